//! Database connections: TLS negotiation, retry policy, and the small SQL
//! helpers the rest of the crate leans on.

use std::time::Duration;

use tokio_postgres::Client;

use crate::config::SslMode;
use crate::error::{PgplanError, Result};

/// Double-quote an identifier for splicing into DDL. Embedded quotes are
/// doubled per the SQL escaping rules.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Reject schema names that fall outside `[A-Za-z0-9_]`.
///
/// Quoting already makes interpolation safe; this check exists so a typo'd
/// or hostile name is reported at configuration time rather than surfacing
/// as a confusing catalog error later.
pub fn validate_identifier(name: &str) -> Result<()> {
    let acceptable =
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if acceptable {
        Ok(())
    } else {
        Err(PgplanError::ConfigError(format!(
            "'{}' is not a usable identifier; letters, digits, and underscores only",
            name
        )))
    }
}

/// Add TCP keepalive settings to a connection string that lacks them.
///
/// URL-style strings grow query parameters, key=value strings grow extra
/// pairs. A zero interval leaves the string alone, as does a string that
/// already mentions keepalives.
fn with_keepalive(conn_string: &str, interval_secs: u32) -> String {
    if interval_secs == 0 || conn_string.to_lowercase().contains("keepalives") {
        return conn_string.to_string();
    }
    let is_url =
        conn_string.starts_with("postgres://") || conn_string.starts_with("postgresql://");
    if is_url {
        let joiner = if conn_string.contains('?') { '&' } else { '?' };
        format!(
            "{}{}keepalives=1&keepalives_idle={}",
            conn_string, joiner, interval_secs
        )
    } else {
        format!(
            "{} keepalives=1 keepalives_idle={}",
            conn_string, interval_secs
        )
    }
}

/// TLS connector trusting the webpki root bundle, on the ring provider.
fn tls_connector() -> tokio_postgres_rustls::MakeRustlsConnect {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("ring provider supports the default protocol versions")
    .with_root_certificates(roots)
    .with_no_client_auth();
    tokio_postgres_rustls::MakeRustlsConnect::new(config)
}

/// Run a connection's driver future in the background for the life of the
/// session.
fn drive<F>(driver: F)
where
    F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = driver.await {
            log::error!("Connection driver exited with error: {}", e);
        }
    });
}

/// One connection attempt honoring the TLS mode. `Prefer` tries TLS and
/// falls back to plaintext when the handshake is refused.
async fn dial(
    conn_string: &str,
    ssl_mode: &SslMode,
) -> std::result::Result<Client, tokio_postgres::Error> {
    match ssl_mode {
        SslMode::Disable => {
            let (client, driver) =
                tokio_postgres::connect(conn_string, tokio_postgres::NoTls).await?;
            drive(driver);
            Ok(client)
        }
        SslMode::Require => {
            let (client, driver) = tokio_postgres::connect(conn_string, tls_connector()).await?;
            drive(driver);
            Ok(client)
        }
        SslMode::Prefer => match tokio_postgres::connect(conn_string, tls_connector()).await {
            Ok((client, driver)) => {
                drive(driver);
                Ok(client)
            }
            Err(tls_err) => {
                log::debug!("TLS handshake rejected ({}); retrying without TLS", tls_err);
                let (client, driver) =
                    tokio_postgres::connect(conn_string, tokio_postgres::NoTls).await?;
                drive(driver);
                Ok(client)
            }
        },
    }
}

/// SQLSTATE class 28 means the credentials themselves are wrong; retrying
/// those only delays the inevitable and can trip account lockouts.
fn is_auth_failure(e: &tokio_postgres::Error) -> bool {
    e.as_db_error()
        .is_some_and(|db| matches!(db.code().code(), "28000" | "28P01"))
}

/// Backoff before retry `attempt`: exponential, capped at 30s, plus up to
/// three quarters of a second of jitter so parallel invocations spread out.
fn retry_delay(attempt: u32) -> Duration {
    let base = (1u64 << attempt.min(5)).min(30);
    Duration::from_secs(base) + Duration::from_millis(fastrand::u64(..750))
}

/// Connect with library defaults: prefer TLS, 30s dial timeout, keepalives.
pub async fn connect(conn_string: &str) -> Result<Client> {
    connect_with_config(conn_string, &SslMode::Prefer, 0, 30, 120).await
}

/// Connect, retrying transient failures up to `retries` times.
///
/// Authentication failures abort immediately. Each attempt is bounded by
/// `connect_timeout_secs` (zero disables the bound), and keepalive
/// parameters are injected unless the connection string sets its own.
pub async fn connect_with_config(
    conn_string: &str,
    ssl_mode: &SslMode,
    retries: u32,
    connect_timeout_secs: u32,
    keepalive_secs: u32,
) -> Result<Client> {
    let conn_string = with_keepalive(conn_string, keepalive_secs);
    let mut attempt: u32 = 0;

    loop {
        // Err(Some(_)) is a server/network error, Err(None) a dial timeout
        let outcome = if connect_timeout_secs > 0 {
            let bound = Duration::from_secs(connect_timeout_secs as u64);
            match tokio::time::timeout(bound, dial(&conn_string, ssl_mode)).await {
                Ok(result) => result.map_err(Some),
                Err(_) => Err(None),
            }
        } else {
            dial(&conn_string, ssl_mode).await.map_err(Some)
        };

        match outcome {
            Ok(client) => {
                if attempt > 0 {
                    log::info!("Connected on attempt {}/{}", attempt + 1, retries + 1);
                }
                return Ok(client);
            }
            Err(Some(e)) if is_auth_failure(&e) => {
                log::error!("Authentication rejected, not retrying");
                return Err(PgplanError::ConnectError(crate::error::format_db_error(&e)));
            }
            Err(failure) if attempt >= retries => {
                return Err(PgplanError::ConnectError(match failure {
                    Some(e) => crate::error::format_db_error(&e),
                    None => format!(
                        "connection attempt timed out after {}s",
                        connect_timeout_secs
                    ),
                }));
            }
            Err(_) => {
                attempt += 1;
                let delay = retry_delay(attempt);
                log::info!(
                    "Connection failed, retrying in {}ms; attempt={}/{}",
                    delay.as_millis(),
                    attempt + 1,
                    retries + 1
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Get the server version as `major.minor` (e.g. `16.2`).
pub async fn server_version(client: &Client) -> Result<String> {
    let row = client.query_one("SHOW server_version", &[]).await?;
    let full: String = row.get(0);
    // Distribution builds report things like "16.2 (Debian 16.2-1.pgdg120+2)"
    Ok(full.split_whitespace().next().unwrap_or(&full).to_string())
}

/// Set the session lock timeout, in milliseconds. Zero disables the timeout.
pub async fn set_lock_timeout(client: &Client, millis: u64) -> Result<()> {
    client
        .batch_execute(&format!("SET lock_timeout = {}", millis))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_appended_to_url() {
        assert_eq!(
            with_keepalive("postgres://svc:pw@db.internal/app", 120),
            "postgres://svc:pw@db.internal/app?keepalives=1&keepalives_idle=120"
        );
        assert_eq!(
            with_keepalive("postgresql://svc:pw@db.internal/app", 60),
            "postgresql://svc:pw@db.internal/app?keepalives=1&keepalives_idle=60"
        );
    }

    #[test]
    fn test_keepalive_joins_existing_query_string() {
        assert_eq!(
            with_keepalive("postgres://svc@db.internal/app?sslmode=require", 60),
            "postgres://svc@db.internal/app?sslmode=require&keepalives=1&keepalives_idle=60"
        );
    }

    #[test]
    fn test_keepalive_key_value_form() {
        assert_eq!(
            with_keepalive("host=db.internal port=5432 user=svc dbname=app", 90),
            "host=db.internal port=5432 user=svc dbname=app keepalives=1 keepalives_idle=90"
        );
    }

    #[test]
    fn test_keepalive_zero_interval_is_noop() {
        assert_eq!(
            with_keepalive("postgres://svc@db.internal/app", 0),
            "postgres://svc@db.internal/app"
        );
    }

    #[test]
    fn test_keepalive_not_duplicated() {
        let already = "host=db.internal keepalives=1 keepalives_idle=45";
        assert_eq!(with_keepalive(already, 120), already);
    }

    #[test]
    fn test_schema_identifier_rules() {
        assert!(validate_identifier("public").is_ok());
        assert!(validate_identifier("tenant_7").is_ok());
        assert!(validate_identifier("Analytics").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("app-schema").is_err());
        assert!(validate_identifier("app schema").is_err());
        assert!(validate_identifier("public;drop schema x").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("open"), "'open'");
        assert_eq!(quote_literal("won't"), "'won''t'");
    }

    #[test]
    fn test_retry_delay_grows_then_caps() {
        let first = retry_delay(1);
        assert!(first >= Duration::from_secs(2));
        assert!(first < Duration::from_millis(2750));

        // The shift is clamped and the base capped at 30s regardless of
        // how many attempts have gone by
        let late = retry_delay(40);
        assert!(late >= Duration::from_secs(30));
        assert!(late < Duration::from_millis(30750));
    }
}
