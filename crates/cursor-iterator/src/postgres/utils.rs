use crate::error::DbError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, Config, NoTls, config::SslMode};
use tracing::{error, warn};

/// Opens a client for `url`, honouring its `sslmode`.
///
/// `disable` connects in plain text, `prefer` tries TLS first and falls back
/// to plain text, every other mode requires TLS.
pub(crate) async fn connect_client(url: &str) -> Result<Client, DbError> {
    let config: Config = url
        .parse()
        .map_err(|e: tokio_postgres::Error| DbError::InvalidUrl(e.to_string()))?;

    match config.get_ssl_mode() {
        SslMode::Disable => connect_plain(&config).await,
        SslMode::Prefer => match connect_tls(&config).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                connect_plain(&config).await
            }
        },
        _ => connect_tls(&config).await,
    }
}

async fn connect_tls(config: &Config) -> Result<Client, DbError> {
    let tls = MakeTlsConnector::new(TlsConnector::builder().build()?);
    let (client, connection) = config.connect(tls).await?;
    spawn_driver(connection);
    Ok(client)
}

async fn connect_plain(config: &Config) -> Result<Client, DbError> {
    let (client, connection) = config.connect(NoTls).await?;
    spawn_driver(connection);
    Ok(client)
}

/// Drives the connection in the background until the client is dropped.
fn spawn_driver<F>(connection: F)
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
}
