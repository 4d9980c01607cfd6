//! Initial schema migration for the cash-register ledger:
//!
//! - `payment_methods`: catalog of payment channels
//! - `registers`: till sessions (open → closed)
//! - `movements`: append-only cash inflows/outflows
//! - `audit_entries`: append-only audit trail

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
pub(crate) enum PaymentMethods {
    Table,
    Id,
    Name,
    NameNorm,
    Active,
}

#[derive(Iden)]
enum Registers {
    Table,
    Id,
    Operator,
    Scope,
    OpenScope,
    Description,
    OpenedBy,
    OpenedAt,
    ClosedAt,
    ClosedBy,
    InitialBalanceMinor,
    BalanceMinor,
    PhysicalCountMinor,
    SystemBalanceMinor,
    DiscrepancyMinor,
    ToleranceMinor,
    Closed,
    Revision,
}

#[derive(Iden)]
enum Movements {
    Table,
    Id,
    RegisterId,
    Sequence,
    OccurredAt,
    Kind,
    PaymentMethodId,
    AmountMinor,
    Description,
    Origin,
    OriginRef,
    CreatedBy,
    ResultingBalanceMinor,
    IdempotencyKey,
}

#[derive(Iden)]
enum AuditEntries {
    Table,
    Id,
    RegisterId,
    MovementId,
    Actor,
    OccurredAt,
    Action,
    Detail,
    SourceAddress,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Payment methods
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(PaymentMethods::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentMethods::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentMethods::Name).string().not_null())
                    .col(ColumnDef::new(PaymentMethods::NameNorm).string().not_null())
                    .col(
                        ColumnDef::new(PaymentMethods::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-payment_methods-name_norm-unique")
                    .table(PaymentMethods::Table)
                    .col(PaymentMethods::NameNorm)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Registers
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Registers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Registers::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Registers::Operator).string())
                    .col(ColumnDef::new(Registers::Scope).string().not_null())
                    .col(ColumnDef::new(Registers::OpenScope).string())
                    .col(ColumnDef::new(Registers::Description).string().not_null())
                    .col(ColumnDef::new(Registers::OpenedBy).string().not_null())
                    .col(ColumnDef::new(Registers::OpenedAt).timestamp().not_null())
                    .col(ColumnDef::new(Registers::ClosedAt).timestamp())
                    .col(ColumnDef::new(Registers::ClosedBy).string())
                    .col(
                        ColumnDef::new(Registers::InitialBalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Registers::BalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Registers::PhysicalCountMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Registers::SystemBalanceMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Registers::DiscrepancyMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Registers::ToleranceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Registers::Closed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Registers::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one open register per scope; closed rows carry NULL.
        manager
            .create_index(
                Index::create()
                    .name("idx-registers-open_scope-unique")
                    .table(Registers::Table)
                    .col(Registers::OpenScope)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-registers-operator-opened_at")
                    .table(Registers::Table)
                    .col(Registers::Operator)
                    .col(Registers::OpenedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-registers-scope-closed_at")
                    .table(Registers::Table)
                    .col(Registers::Scope)
                    .col(Registers::ClosedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Movements
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Movements::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Movements::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Movements::RegisterId).string().not_null())
                    .col(ColumnDef::new(Movements::Sequence).big_integer().not_null())
                    .col(ColumnDef::new(Movements::OccurredAt).timestamp().not_null())
                    .col(ColumnDef::new(Movements::Kind).string().not_null())
                    .col(ColumnDef::new(Movements::PaymentMethodId).string().not_null())
                    .col(
                        ColumnDef::new(Movements::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Movements::Description).string().not_null())
                    .col(ColumnDef::new(Movements::Origin).string().not_null())
                    .col(ColumnDef::new(Movements::OriginRef).string())
                    .col(ColumnDef::new(Movements::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Movements::ResultingBalanceMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Movements::IdempotencyKey).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-movements-register_id")
                            .from(Movements::Table, Movements::RegisterId)
                            .to(Registers::Table, Registers::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-movements-payment_method_id")
                            .from(Movements::Table, Movements::PaymentMethodId)
                            .to(PaymentMethods::Table, PaymentMethods::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-movements-register_id-sequence-unique")
                    .table(Movements::Table)
                    .col(Movements::RegisterId)
                    .col(Movements::Sequence)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-movements-register_id-idempotency_key-unique")
                    .table(Movements::Table)
                    .col(Movements::RegisterId)
                    .col(Movements::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-movements-origin-origin_ref")
                    .table(Movements::Table)
                    .col(Movements::Origin)
                    .col(Movements::OriginRef)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Audit entries
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(AuditEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEntries::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditEntries::RegisterId).string())
                    .col(ColumnDef::new(AuditEntries::MovementId).string())
                    .col(ColumnDef::new(AuditEntries::Actor).string().not_null())
                    .col(
                        ColumnDef::new(AuditEntries::OccurredAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditEntries::Action).string().not_null())
                    .col(ColumnDef::new(AuditEntries::Detail).string().not_null())
                    .col(ColumnDef::new(AuditEntries::SourceAddress).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-audit_entries-register_id")
                            .from(AuditEntries::Table, AuditEntries::RegisterId)
                            .to(Registers::Table, Registers::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-audit_entries-movement_id")
                            .from(AuditEntries::Table, AuditEntries::MovementId)
                            .to(Movements::Table, Movements::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-audit_entries-register_id-occurred_at")
                    .table(AuditEntries::Table)
                    .col(AuditEntries::RegisterId)
                    .col(AuditEntries::OccurredAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(AuditEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Movements::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Registers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
            .await?;
        Ok(())
    }
}
