//! PostgreSQL connection settings from flags and environment.

use anyhow::{Context, Result};
use clap::Args;
use sqlx::postgres::PgConnectOptions;
use storage::PgStoreConfig;

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Full connection URL; takes precedence over the PG_* settings
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    #[arg(long, env = "PG_DBNAME")]
    pub pg_dbname: Option<String>,

    #[arg(long, env = "PG_USER")]
    pub pg_user: Option<String>,

    #[arg(long, env = "PG_PASSWORD", hide_env_values = true)]
    pub pg_password: Option<String>,

    /// Maximum pooled connections
    #[arg(long, env = "PG_MAX_CONNECTIONS", default_value_t = 4)]
    pub max_connections: u32,
}

impl DatabaseArgs {
    pub fn store_config(&self) -> Result<PgStoreConfig> {
        let url = self
            .database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty());

        let mut config = match url {
            Some(url) => PgStoreConfig::new(url),
            None => {
                let database = self
                    .pg_dbname
                    .as_deref()
                    .context("Set DATABASE_URL or PG_DBNAME to select a database")?;
                let mut options = PgConnectOptions::new()
                    .host(&self.pg_host)
                    .port(self.pg_port)
                    .database(database);
                if let Some(user) = &self.pg_user {
                    options = options.username(user);
                }
                if let Some(password) = &self.pg_password {
                    options = options.password(password);
                }
                PgStoreConfig::from_options(options)
            }
        };
        config.max_connections = self.max_connections;
        Ok(config)
    }
}
