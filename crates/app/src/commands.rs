use std::{error::Error, io};

use csv::Writer;
use engine::{
    Authority, Engine, EngineError, Money, Movement, MovementCmd, MovementListFilter, OpenRegisterCmd,
    PaymentMethod, Register,
};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::{AuditCommand, Command, MethodCommand, MovementCommand, RegisterCommand};

pub type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(engine: &Engine, authority: &Authority, command: Command) -> CliResult<()> {
    match command {
        Command::Register(args) => register(engine, authority, args.command).await,
        Command::Movement(args) => movement(engine, authority, args.command).await,
        Command::Method(args) => method(engine, authority, args.command).await,
        Command::Audit(args) => audit(engine, authority, args.command).await,
    }
}

async fn register(engine: &Engine, authority: &Authority, command: RegisterCommand) -> CliResult<()> {
    let operator = authority.operator.as_deref();
    match command {
        RegisterCommand::Open {
            initial,
            description,
            tolerance,
            carry_over,
        } => {
            let initial = match (initial, carry_over) {
                (Some(initial), _) => initial,
                (None, true) => engine
                    .last_closing_balance(authority, operator)
                    .await?
                    .unwrap_or_default(),
                (None, false) => Money::ZERO,
            };
            let mut cmd = OpenRegisterCmd::new(initial);
            cmd.description = description;
            cmd.tolerance = tolerance;
            let register = engine.open_register(authority, cmd).await?;
            println!("opened register {}", register.id);
            print_register(&register);
        }
        RegisterCommand::Close { register, physical } => {
            let report = engine.close_register(authority, register, physical).await?;
            print_register(&report.register);
            println!(
                "system {} | physical {} | discrepancy {}{}",
                report.system_balance,
                report.physical_amount,
                report.discrepancy,
                if report.within_tolerance {
                    ""
                } else {
                    " (over tolerance)"
                }
            );
        }
        RegisterCommand::Show { register } => {
            let register = engine.register(authority, register).await?;
            print_register(&register);
            let balance = engine.current_balance(authority, register.id).await?;
            println!("current balance {balance}");
        }
        RegisterCommand::List { limit } => {
            for register in engine
                .registers_for_operator(authority, operator, limit)
                .await?
            {
                print_register(&register);
            }
        }
        RegisterCommand::Current => match engine.open_register_for(authority, operator).await? {
            Some(register) => print_register(&register),
            None => println!("no open register"),
        },
        RegisterCommand::Verify { register, repair } => {
            let check = if repair {
                engine.recompute_register_balance(authority, register).await?
            } else {
                engine.verify_register_balance(authority, register).await?
            };
            if check.is_consistent() {
                println!("balance {} matches the history", check.replayed);
            } else {
                println!(
                    "stored {} vs replayed {} (drift {}){}",
                    check.materialized,
                    check.replayed,
                    check.drift(),
                    if repair { ", repaired" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn movement(engine: &Engine, authority: &Authority, command: MovementCommand) -> CliResult<()> {
    match command {
        MovementCommand::Add {
            register,
            kind,
            amount,
            method,
            description,
            origin,
            origin_ref,
            idempotency_key,
        } => {
            let method = resolve_method(engine, authority, &method).await?;
            let mut cmd = MovementCmd::new(register, kind, amount, method.id).origin(origin, origin_ref);
            cmd.description = description;
            cmd.idempotency_key = idempotency_key;
            let movement = engine.append_movement(authority, cmd).await?;
            print_movement(&movement, &method.name);
        }
        MovementCommand::List {
            register,
            limit,
            cursor,
            search,
            kind,
            origin,
        } => {
            let filter = MovementListFilter {
                search,
                kind,
                origin,
                ..Default::default()
            };
            let (movements, next) = engine
                .list_movements(authority, register, &filter, limit, cursor.as_deref())
                .await?;
            let methods = engine.payment_methods(authority, true).await?;
            for movement in &movements {
                print_movement(movement, method_name(&methods, movement.payment_method_id));
            }
            if let Some(next) = next {
                println!("next page: --cursor {next}");
            }
        }
        MovementCommand::Export { register, output } => {
            let history = engine.register_history(authority, register).await?;
            let methods = engine.payment_methods(authority, true).await?;
            match output {
                Some(path) => {
                    let mut writer = Writer::from_path(&path)?;
                    write_export(&mut writer, &history, &methods)?;
                    println!("exported {} movements to {path}", history.len());
                }
                None => {
                    let mut writer = Writer::from_writer(io::stdout());
                    write_export(&mut writer, &history, &methods)?;
                }
            }
        }
        MovementCommand::Summary { register } => {
            let summary = engine.movement_summary(authority, register).await?;
            for line in &summary.lines {
                println!(
                    "{:<8} {:<16} {:>4} {:>12}",
                    line.kind.as_str(),
                    line.payment_method,
                    line.movements,
                    line.total
                );
            }
            println!(
                "initial {} | in {} | out {} | balance {}",
                summary.initial_balance,
                summary.total_inflow,
                summary.total_outflow,
                summary.balance
            );
        }
    }
    Ok(())
}

async fn method(engine: &Engine, authority: &Authority, command: MethodCommand) -> CliResult<()> {
    match command {
        MethodCommand::Add { name } => {
            let method = engine.new_payment_method(authority, &name).await?;
            println!("added payment method {} ({})", method.name, method.id);
        }
        MethodCommand::List { all } => {
            for method in engine.payment_methods(authority, all).await? {
                println!(
                    "{} {}{}",
                    method.id,
                    method.name,
                    if method.active { "" } else { " (inactive)" }
                );
            }
        }
        MethodCommand::Toggle { method } => {
            let method = resolve_method(engine, authority, &method).await?;
            let method = engine.toggle_payment_method(authority, method.id).await?;
            println!(
                "{} is now {}",
                method.name,
                if method.active { "active" } else { "inactive" }
            );
        }
    }
    Ok(())
}

async fn audit(engine: &Engine, authority: &Authority, command: AuditCommand) -> CliResult<()> {
    match command {
        AuditCommand::List { register, limit } => {
            for entry in engine.list_audit_entries(authority, register, limit).await? {
                println!(
                    "{} {:<12} {:<10} {}",
                    entry.occurred_at.to_rfc3339(),
                    entry.action.as_str(),
                    entry.actor,
                    entry.detail
                );
            }
        }
    }
    Ok(())
}

async fn resolve_method(
    engine: &Engine,
    authority: &Authority,
    raw: &str,
) -> Result<PaymentMethod, EngineError> {
    match Uuid::parse_str(raw.trim()) {
        Ok(id) => engine.payment_method(authority, id).await,
        Err(_) => engine.payment_method_by_name(authority, raw).await,
    }
}

fn method_name(methods: &[PaymentMethod], id: Uuid) -> &str {
    methods
        .iter()
        .find(|m| m.id == id)
        .map_or("?", |m| m.name.as_str())
}

fn print_register(register: &Register) {
    let state = if register.closed { "closed" } else { "open" };
    println!(
        "{} [{state}] {} | operator {} | opened {} by {} | initial {} | balance {}",
        register.id,
        register.description,
        register.operator.as_deref().unwrap_or("general"),
        register.opened_at.to_rfc3339(),
        register.opened_by,
        register.initial_balance,
        register.balance,
    );
}

fn print_movement(movement: &Movement, method: &str) {
    println!(
        "#{:<4} {} {:<7} {:>12} {:<12} {:>12} {}",
        movement.sequence,
        movement.occurred_at.to_rfc3339(),
        movement.kind.as_str(),
        movement.amount,
        method,
        movement.resulting_balance,
        movement.description
    );
}

#[derive(Serialize)]
struct ExportRow<'a> {
    sequence: i64,
    occurred_at: String,
    kind: &'a str,
    payment_method: &'a str,
    amount: String,
    description: &'a str,
    origin: &'a str,
    origin_ref: Option<&'a str>,
    created_by: &'a str,
    resulting_balance: String,
}

fn write_export<W: io::Write>(
    writer: &mut Writer<W>,
    history: &[Movement],
    methods: &[PaymentMethod],
) -> CliResult<()> {
    for movement in history {
        writer.serialize(ExportRow {
            sequence: movement.sequence,
            occurred_at: movement.occurred_at.to_rfc3339(),
            kind: movement.kind.as_str(),
            payment_method: method_name(methods, movement.payment_method_id),
            amount: movement.amount.to_string(),
            description: &movement.description,
            origin: movement.origin.as_str(),
            origin_ref: movement.origin_ref.as_deref(),
            created_by: &movement.created_by,
            resulting_balance: movement.resulting_balance.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}
