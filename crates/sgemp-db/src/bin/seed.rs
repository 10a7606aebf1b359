//! # Seed Data
//!
//! Populates a fresh database with the default payment methods, the walk-in
//! customer and a starter catalog with opening stock.
//!
//! ## Usage
//! ```bash
//! # Seed the default development database
//! cargo run -p sgemp-db --bin seed
//!
//! # Specify database path
//! cargo run -p sgemp-db --bin seed -- --db ./data/sgemp.db
//! ```

use std::env;

use sgemp_db::{seed_defaults, Database, DbConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./sgemp_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Sgemp Seed Data");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./sgemp_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Sgemp Seed Data");
    println!("==================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let Some(report) = seed_defaults(&db).await? else {
        println!("⚠ Database already has products");
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    };

    println!();
    println!("✓ {} payment methods", report.payment_method_ids.len());
    println!("✓ Customer #{}", report.customer_id);

    for id in &report.product_ids {
        let stock = db.stock().current_stock(*id).await?;
        println!("  product #{id}: stock {stock}");
    }

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
