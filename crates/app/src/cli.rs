use clap::{Args, Parser, Subcommand};
use engine::{Money, MovementKind, MovementOrigin, Role};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "cashbox")]
#[command(about = "Cash-register ledger for the shop counter")]
pub struct Cli {
    /// Settings file (TOML, without extension).
    #[arg(long)]
    pub config: Option<String>,

    /// Acting identity (defaults to `ledger.actor` from settings).
    #[arg(long, env = "CASHBOX_ACTOR")]
    pub actor: Option<String>,

    #[arg(long, value_parser = parse_role, default_value = "owner")]
    pub role: Role,

    /// Operator the actor works for (required for cashiers).
    #[arg(long)]
    pub operator: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open, close and inspect registers.
    Register(RegisterArgs),
    /// Append and browse movements.
    Movement(MovementArgs),
    /// Manage the payment method catalog.
    Method(MethodArgs),
    /// Inspect the audit log.
    Audit(AuditArgs),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(subcommand)]
    pub command: RegisterCommand,
}

#[derive(Subcommand, Debug)]
pub enum RegisterCommand {
    Open {
        /// Starting balance (0.00 when omitted).
        #[arg(long, value_parser = parse_money)]
        initial: Option<Money>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_money)]
        tolerance: Option<Money>,
        /// Seed the initial balance from the last closing of this scope.
        #[arg(long, conflicts_with = "initial", default_value_t = false)]
        carry_over: bool,
    },
    Close {
        register: Uuid,
        #[arg(long, value_parser = parse_money)]
        physical: Money,
    },
    Show {
        register: Uuid,
    },
    List {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Show the open register of the operator, if any.
    Current,
    /// Compare the stored balance with a replay of the history.
    Verify {
        register: Uuid,
        /// Rewrite the stored balance when it drifted.
        #[arg(long, default_value_t = false)]
        repair: bool,
    },
}

#[derive(Args, Debug)]
pub struct MovementArgs {
    #[command(subcommand)]
    pub command: MovementCommand,
}

#[derive(Subcommand, Debug)]
pub enum MovementCommand {
    Add {
        register: Uuid,
        #[arg(long, value_parser = parse_kind)]
        kind: MovementKind,
        #[arg(long, value_parser = parse_money)]
        amount: Money,
        /// Payment method name or id.
        #[arg(long, default_value = "Cash")]
        method: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_origin, default_value = "manual")]
        origin: MovementOrigin,
        #[arg(long)]
        origin_ref: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    List {
        register: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<MovementKind>,
        #[arg(long, value_parser = parse_origin)]
        origin: Option<MovementOrigin>,
    },
    /// Write the register history as CSV (stdout when no output is given).
    Export {
        register: Uuid,
        #[arg(long)]
        output: Option<String>,
    },
    /// Totals per kind and payment method.
    Summary {
        register: Uuid,
    },
}

#[derive(Args, Debug)]
pub struct MethodArgs {
    #[command(subcommand)]
    pub command: MethodCommand,
}

#[derive(Subcommand, Debug)]
pub enum MethodCommand {
    Add {
        name: String,
    },
    List {
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    Toggle {
        /// Payment method name or id.
        method: String,
    },
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    List {
        #[arg(long)]
        register: Option<Uuid>,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

fn parse_money(raw: &str) -> Result<Money, String> {
    raw.parse::<Money>().map_err(|err| err.detail())
}

fn parse_kind(raw: &str) -> Result<MovementKind, String> {
    MovementKind::try_from(raw.to_ascii_lowercase().as_str()).map_err(|err| err.detail())
}

fn parse_origin(raw: &str) -> Result<MovementOrigin, String> {
    MovementOrigin::try_from(raw.to_ascii_lowercase().as_str()).map_err(|err| err.detail())
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::try_from(raw.to_ascii_lowercase().as_str()).map_err(|err| err.detail())
}
