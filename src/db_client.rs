use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod, Runtime,
};
use tokio_postgres::{types::ToSql, NoTls, Row};

use crate::{config::Config, error::AppError};

/// Pooled database handle shared across handlers. Single-statement reads
/// and writes go through the passthrough methods; multi-row writes check
/// out a connection with `conn` and run inside a transaction.
#[derive(Clone)]
pub struct DbClient(Pool);

impl DbClient {
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(config.db_host.clone());
        cfg.user = Some(config.db_user.clone());
        cfg.password = Some(config.db_pass.clone());
        cfg.dbname = Some(config.db_name.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Ok(Self(pool))
    }

    pub async fn conn(&self) -> Result<Object, AppError> {
        Ok(self.0.get().await?)
    }

    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError> {
        Ok(self.conn().await?.query(statement, params).await?)
    }

    pub async fn query_opt(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, AppError> {
        Ok(self.conn().await?.query_opt(statement, params).await?)
    }

    pub async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, AppError> {
        Ok(self.conn().await?.query_one(statement, params).await?)
    }

    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, AppError> {
        Ok(self.conn().await?.execute(statement, params).await?)
    }
}
