//! Seeds the default `Cash` payment method so a fresh database can record
//! movements right away.

use sea_orm_migration::prelude::*;
use uuid::Uuid;

use super::m20261019_000000_init::PaymentMethods;

const CASH: &str = "Cash";
const CASH_NORM: &str = "cash";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut insert = Query::insert();
        insert
            .into_table(PaymentMethods::Table)
            .columns([
                PaymentMethods::Id,
                PaymentMethods::Name,
                PaymentMethods::NameNorm,
                PaymentMethods::Active,
            ])
            .values([
                Uuid::new_v4().to_string().into(),
                CASH.into(),
                CASH_NORM.into(),
                true.into(),
            ])
            .map_err(|err| DbErr::Custom(format!("cannot build cash seed: {err}")))?
            .on_conflict(
                OnConflict::column(PaymentMethods::NameNorm)
                    .do_nothing()
                    .to_owned(),
            );
        manager.exec_stmt(insert).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .exec_stmt(
                Query::delete()
                    .from_table(PaymentMethods::Table)
                    .and_where(Expr::col(PaymentMethods::NameNorm).eq(CASH_NORM))
                    .to_owned(),
            )
            .await
    }
}
