//! Redis pub/sub publisher.
//!
//! The connection is opened on the first publish and dropped after any error,
//! so the next publish reconnects. Retrying is the pump's job.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tb_core::Frame;
use tb_core::config::BusConfig;
use tb_core::error::TbError;
use tracing::{info, warn};
use url::Url;

use crate::publisher::{Ack, Publisher, PublishError};

pub struct RedisPublisher {
    client: redis::Client,
    channel: String,
    address: String,
    conn: Option<MultiplexedConnection>,
}

impl RedisPublisher {
    /// Build a publisher for `config`. Does not connect.
    pub fn new(config: &BusConfig) -> Result<Self, TbError> {
        let url = bus_url(config)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| TbError::Config(format!("bus: {e}")))?;
        Ok(Self {
            client,
            channel: config.channel.clone(),
            address: config.address.clone(),
            conn: None,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&mut self, frame: &Frame) -> Result<Ack, PublishError> {
        // Taken for the duration of the call: a publish abandoned mid-flight
        // leaves no connection behind.
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| PublishError::Connect(e.to_string()))?;
                info!(address = %self.address, channel = %self.channel, "[bus] connected");
                conn
            }
        };

        let sent: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&frame.payload[..])
            .query_async(&mut conn)
            .await;
        match sent {
            Ok(n) => {
                self.conn = Some(conn);
                Ok(Ack { receivers: u64::try_from(n).unwrap_or(0) })
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "[bus] publish failed, dropping connection");
                Err(PublishError::Rejected(e.to_string()))
            }
        }
    }
}

/// `redis://[:password@]host:port/db` for `config`.
fn bus_url(config: &BusConfig) -> Result<Url, TbError> {
    let mut url = Url::parse(&format!("redis://{}", config.address))
        .map_err(|e| TbError::Config(format!("bus.address {:?}: {e}", config.address)))?;
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| TbError::Config("bus.password cannot be set on this address".into()))?;
    }
    url.set_path(&format!("/{}", config.db));
    Ok(url)
}
