//! bb8 connection manager for tiberius.

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

use crate::driver::ConnectionSettings;
use crate::error::{FlowError, Result};

/// Database every control connection attaches to.
pub const CONTROL_DATABASE: &str = "msdb";

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    settings: ConnectionSettings,
    control: bool,
}

impl TiberiusConnectionManager {
    pub fn new(settings: ConnectionSettings, control: bool) -> Self {
        Self { settings, control }
    }

    fn database(&self) -> &str {
        if self.control {
            CONTROL_DATABASE
        } else {
            &self.settings.database
        }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.host);
        config.port(self.settings.port);
        config.database(self.database());
        config.authentication(AuthMethod::sql_server(
            &self.settings.username,
            &self.settings.password,
        ));
        config.trust_cert();
        config.encryption(EncryptionLevel::NotSupported);
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Open a single-connection pool and verify it answers.
pub async fn open_pool(
    settings: &ConnectionSettings,
    control: bool,
) -> Result<Pool<TiberiusConnectionManager>> {
    let manager = TiberiusConnectionManager::new(settings.clone(), control);
    let database = manager.database().to_string();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .await
        .map_err(|e| FlowError::pool(e, "creating SQL Server pool"))?;

    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| FlowError::pool(e, "testing SQL Server connection"))?;
        conn.simple_query("SELECT 1").await?.into_results().await?;
    }

    info!(
        "Connected to SQL Server: {}:{}/{}",
        settings.host, settings.port, database
    );
    Ok(pool)
}
