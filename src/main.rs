// Demo walkthrough: register a few assets, run a batch, post entries,
// revalue and dispose - against an in-memory database and ledger.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use temple_assets::{
    Asset, BatchRequest, DepreciationEngine, DepreciationMethod, DisposalType, InMemoryLedger,
    ScheduleParams,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("temple-assets v{} - depreciation engine demo", temple_assets::VERSION);

    let ledger = Arc::new(InMemoryLedger::new());
    let mut engine = DepreciationEngine::open_in_memory(ledger.clone())?;

    // 1. Register assets
    let generator = Asset::new(
        "Main Hall Generator",
        100_000.0,
        10_000.0,
        DepreciationMethod::StraightLine {
            useful_life_years: 5,
        },
        date(2024, 1, 1),
    );
    let van = Asset::new(
        "Community Kitchen Van",
        60_000.0,
        6_000.0,
        DepreciationMethod::WrittenDownValue { rate: 0.2 },
        date(2024, 1, 1),
    );
    let mill = Asset::new(
        "Flour Mill",
        45_000.0,
        4_500.0,
        DepreciationMethod::UnitsOfProduction {
            total_estimated_units: 81_000.0,
        },
        date(2024, 1, 1),
    );
    for asset in [&generator, &van, &mill] {
        engine.register_asset(asset)?;
        println!("registered: {} ({})", asset.name, asset.id);
    }

    // 2. Batch-calculate drafts for the year
    let mut request = BatchRequest::new(date(2024, 1, 1), date(2024, 12, 31));
    request.units_produced.insert(mill.id.clone(), 16_200.0);
    let report = engine.run_batch_depreciation(&request)?;
    println!("{}", report.summary());

    // 3. Post every draft
    for success in &report.succeeded {
        let journal_ref = engine.post_schedule(&success.entry_id, date(2024, 12, 31))?;
        println!(
            "posted {:>10.2} for asset {} -> {}",
            success.amount, success.asset_id, journal_ref
        );
    }

    // 4. Revalue the generator upward
    let event = engine.revalue_asset(&generator.id, date(2025, 1, 15), 90_000.0, "market", "board")?;
    println!(
        "revalued generator: {:+.2} ({})",
        event.adjustment,
        event.routing.as_str()
    );

    // The next schedule depreciates from the revalued base
    let entry = engine.calculate_schedule(
        &generator.id,
        date(2025, 1, 1),
        date(2025, 12, 31),
        &ScheduleParams::default(),
    )?;
    println!(
        "next generator entry: opening {:.2}, amount {:.2}",
        entry.opening_book_value, entry.amount
    );

    // 5. Dispose the van
    let disposal = engine.dispose_asset(&van.id, date(2025, 3, 1), 50_000.0, DisposalType::Sale)?;
    println!(
        "disposed van for {:.2}: gain/loss {:+.2}",
        disposal.proceeds, disposal.gain_loss
    );

    // 6. Audit: cached projections must match replay of the posted events
    for asset in engine.list_assets()? {
        let replayed = engine.replay_ledger(&asset.id)?;
        println!(
            "{:<24} status={:<8} book={:>10.2} replay_ok={}",
            asset.name,
            asset.status.as_str(),
            asset.book_value,
            replayed.matches(&asset)
        );
    }

    println!("journal entries accepted by ledger: {}", ledger.accepted_count());
    Ok(())
}
