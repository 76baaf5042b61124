pub mod analysis;
pub mod domain;
pub mod ingest;
pub mod refresh;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;
    use sqlx::postgres::PgConnectOptions;
    use std::str::FromStr;

    pub const DEFAULT_PRICE_PROVIDER_BASE_URL: &str = "https://query1.finance.yahoo.com";
    const DEFAULT_DB_PORT: u16 = 5432;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub db_host: Option<String>,
        pub db_port: Option<String>,
        pub db_user: Option<String>,
        pub db_password: Option<String>,
        pub db_name: Option<String>,
        pub sentry_dsn: Option<String>,
        pub price_provider_base_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
            Ok(Self {
                database_url: get("DATABASE_URL"),
                db_host: get("DB_HOST"),
                db_port: get("DB_PORT"),
                db_user: get("DB_USER"),
                db_password: get("DB_PASSWORD"),
                db_name: get("DB_NAME"),
                sentry_dsn: get("SENTRY_DSN"),
                price_provider_base_url: get("PRICE_PROVIDER_BASE_URL"),
            })
        }

        /// Connection options from `DATABASE_URL`, falling back to the discrete `DB_*` variables.
        pub fn pg_connect_options(&self) -> anyhow::Result<PgConnectOptions> {
            if let Some(url) = self.database_url.as_deref() {
                return PgConnectOptions::from_str(url).context("DATABASE_URL is not a valid url");
            }

            let host = self
                .db_host
                .as_deref()
                .context("DATABASE_URL or DB_HOST is required")?;
            let name = self.db_name.as_deref().context("DB_NAME is required")?;
            let port = match self.db_port.as_deref() {
                Some(p) => p
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("DB_PORT must be a port number (got {p})"))?,
                None => DEFAULT_DB_PORT,
            };

            let mut opts = PgConnectOptions::new()
                .host(host)
                .port(port)
                .database(name);
            if let Some(user) = self.db_user.as_deref() {
                opts = opts.username(user);
            }
            if let Some(password) = self.db_password.as_deref() {
                opts = opts.password(password);
            }
            Ok(opts)
        }

        pub fn price_provider_base_url(&self) -> &str {
            self.price_provider_base_url
                .as_deref()
                .unwrap_or(DEFAULT_PRICE_PROVIDER_BASE_URL)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::collections::HashMap;

        fn settings(vars: &[(&str, &str)]) -> Settings {
            let map: HashMap<String, String> = vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Settings::from_lookup(|k| map.get(k).cloned()).unwrap()
        }

        #[test]
        fn database_url_takes_precedence() {
            let s = settings(&[
                ("DATABASE_URL", "postgres://app:pw@db.internal:6543/prices"),
                ("DB_HOST", "ignored"),
                ("DB_NAME", "ignored"),
            ]);
            let opts = s.pg_connect_options().unwrap();
            assert_eq!(opts.get_host(), "db.internal");
            assert_eq!(opts.get_port(), 6543);
            assert_eq!(opts.get_database(), Some("prices"));
        }

        #[test]
        fn builds_options_from_discrete_vars() {
            let s = settings(&[
                ("DB_HOST", "localhost"),
                ("DB_USER", "etl"),
                ("DB_PASSWORD", "p@ss:word"),
                ("DB_NAME", "stocks"),
            ]);
            let opts = s.pg_connect_options().unwrap();
            assert_eq!(opts.get_host(), "localhost");
            assert_eq!(opts.get_port(), 5432);
            assert_eq!(opts.get_username(), "etl");
            assert_eq!(opts.get_database(), Some("stocks"));
        }

        #[test]
        fn rejects_missing_connection_parameters() {
            assert!(settings(&[]).pg_connect_options().is_err());
            assert!(settings(&[("DB_HOST", "localhost")])
                .pg_connect_options()
                .is_err());
            assert!(settings(&[("DB_HOST", "h"), ("DB_NAME", "d"), ("DB_PORT", "five")])
                .pg_connect_options()
                .is_err());
        }

        #[test]
        fn blank_values_are_treated_as_unset() {
            let s = settings(&[("PRICE_PROVIDER_BASE_URL", "  "), ("SENTRY_DSN", "")]);
            assert_eq!(s.price_provider_base_url(), DEFAULT_PRICE_PROVIDER_BASE_URL);
            assert!(s.sentry_dsn.is_none());
        }
    }
}
