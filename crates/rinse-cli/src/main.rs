use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rinse_common::{transaction, CardDump, CardImage, CardLayout, UsageReading, ValueBlock};
use rinse_operators::OperatorTable;

mod balance;

#[derive(Parser)]
#[command(name = "rinse")]
#[command(about = "Stored-value card dump analyzer and editor")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a dump: operator, balance, transaction history, usage data
    Info {
        /// Card dump file
        file: PathBuf,
    },
    /// Report the detected operator and confidence
    Detect {
        /// Card dump file
        file: PathBuf,
    },
    /// Rewrite the balance and transaction blocks
    SetBalance {
        /// Card dump file
        file: PathBuf,
        /// New balance in dollars, e.g. 25.00
        #[arg(long)]
        amount: String,
        /// How much bookkeeping to apply alongside the balance change
        #[arg(long, value_enum, default_value = "normal")]
        mode: Mode,
        /// Output file; defaults to rewriting the input
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Balance only, no bookkeeping
    Normal,
    /// Simulate a real top-up: counter, refill tracking, receipt
    Legit,
    /// Advance the transaction id but skip refill tracking
    Hack,
}

fn main() {
    // Set RUST_LOG=debug for detailed logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let table = OperatorTable::builtin();
    match args.command {
        Command::Info { file } => {
            let dump = load(&file)?;
            print_info(&dump.image, &table);
        }
        Command::Detect { file } => {
            let dump = load(&file)?;
            let detection = table.detect(&dump.image);
            println!(
                "{} (operator {}, confidence {})",
                detection.name, detection.operator.0, detection.confidence
            );
        }
        Command::SetBalance {
            file,
            amount,
            mode,
            out,
        } => {
            let mut dump = load(&file)?;
            let cents = parse_dollars(&amount)?;
            let detection = table.detect(&dump.image);
            let outcome = balance::set_balance(
                &mut dump.image,
                &table,
                &detection,
                cents,
                mode == Mode::Legit,
                mode != Mode::Normal,
            )?;

            let target = out.unwrap_or(file);
            fs::write(&target, dump.serialize())?;
            info!(file = %target.display(), "dump written");

            println!("Balance: ${:.2} -> ${:.2}", outcome.old_cents as f64 / 100.0, cents as f64 / 100.0);
            println!("Balance block: {}", outcome.balance_block);
            if !outcome.mirrors_updated.is_empty() {
                println!("Mirrors updated: {:?}", outcome.mirrors_updated);
            }
            match mode {
                Mode::Legit => println!("Top-up recorded with refill tracking"),
                Mode::Hack => println!("Transaction id advanced, refill tracking untouched"),
                Mode::Normal => println!("No transaction bookkeeping applied"),
            }
        }
    }
    Ok(())
}

fn load(file: &PathBuf) -> Result<CardDump, Box<dyn Error>> {
    let text = fs::read_to_string(file)?;
    Ok(CardDump::parse(&text)?)
}

fn parse_dollars(text: &str) -> Result<u16, Box<dyn Error>> {
    let dollars: f64 = text.trim().trim_start_matches('$').parse()?;
    let cents = (dollars * 100.0).round();
    if !(0.0..=65535.0).contains(&cents) {
        return Err("balance must be between $0.00 and $655.35".into());
    }
    Ok(cents as u16)
}

fn print_info(image: &CardImage, table: &OperatorTable) {
    let detection = table.detect(image);

    println!("=== Card Profile ===\n");
    println!("UID: {}", hex::encode_upper(&image.uid));
    let type_name = match image.layout() {
        CardLayout::Classic1k => "MIFARE Classic 1K",
        CardLayout::Classic4k => "MIFARE Classic 4K",
    };
    println!("Type: {type_name}");
    println!(
        "Operator: {} (confidence {})",
        detection.name, detection.confidence
    );

    println!("\n=== Balance ===\n");
    for block_index in balance::balance_candidates(table, &detection) {
        let Ok(block) = image.block(block_index) else {
            continue;
        };
        if !block.readable {
            println!("Block {block_index}: never read");
            continue;
        }
        match ValueBlock::decode(&block.data) {
            Some(value) => {
                let counter = value
                    .counter()
                    .map(|c| format!(", counter {c}"))
                    .unwrap_or_default();
                println!(
                    "Block {}: ${:.2}{}",
                    block_index,
                    value.value() as f64 / 100.0,
                    counter
                );
            }
            None => println!("Block {block_index}: no valid value encoding"),
        }
    }

    if let Some(receipt) = table.field_with_purpose(detection.operator, "last_transaction") {
        if let Ok(block) = image.block(receipt.block) {
            if block.readable {
                println!("\n=== Transactions ===\n");
                match transaction::decode(&block.data) {
                    Some(fields) => {
                        println!("Transaction id: {}", fields.transaction_id);
                        println!("Refill count: {}", fields.refill_count);
                        println!(
                            "Last top-up: ${:.2}",
                            fields.last_amount_cents as f64 / 100.0
                        );
                        let residue = transaction::checksum_residue(&block.data);
                        if residue != 0 {
                            println!("Checksum: INVALID (residue {residue:#04X})");
                        }
                    }
                    None => println!("Block {}: no transaction signature", receipt.block),
                }
            }
        }
    }

    if let Some(usage) = table.field_with_purpose(detection.operator, "usage_counter") {
        if let Ok(block) = image.block(usage.block) {
            if block.readable {
                println!("\n=== Usage ===\n");
                let reading = UsageReading::decode(&block.data);
                println!("Remaining uses: {}", reading.remaining_uses);
                if let Some(capacity) = reading.capacity {
                    println!("Capacity reading: {capacity}");
                }
            }
        }
    }

    let layout = image.layout();
    let authenticated = (0..layout.sector_count())
        .filter(|s| image.sector_keys(*s).authenticated())
        .count();
    let unreadable = image.blocks().iter().filter(|b| !b.readable).count();
    println!("\n=== Coverage ===\n");
    println!(
        "Sectors with known keys: {}/{}",
        authenticated,
        layout.sector_count()
    );
    println!("Unreadable blocks: {unreadable}");
}
