//! Merge engine against a real SQLite file: snapshot dedup, price fallback,
//! per-row output and degradation when a source cannot be read.

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tempfile::TempDir;
use yieldfold::config::{DbConfig, MergeConfig, TableNames};
use yieldfold::merge::{MergeEngine, MergeOutcome};
use yieldfold::migration::prepare_schema;
use yieldfold::records::{BifrostBatch, BifrostSiteRow, BifrostStakingRow, HydrationRow, PoolRow, PriceRow};
use yieldfold::sqlite_pragma::open_connection;
use yieldfold::store::{BifrostStore, HydrationPriceStore, HydrationStore, SourceStore, StellaswapStore};

struct Fixture {
    _dir: TempDir,
    db: DbConfig,
    tables: TableNames,
    conn: Connection,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let db = DbConfig::new(dir.path().join("merge.db").to_string_lossy().to_string());
    let tables = TableNames::default();
    let mut conn = open_connection(&db).unwrap();
    prepare_schema(&mut conn, &tables, None).unwrap();
    Fixture {
        _dir: dir,
        db,
        tables,
        conn,
    }
}

fn dec(s: &str) -> Option<Decimal> {
    Some(Decimal::from_str(s).unwrap())
}

fn bifrost_batch() -> BifrostBatch {
    BifrostBatch {
        site: vec![BifrostSiteRow {
            asset: "vKSM".to_string(),
            value: None,
            tvl: dec("3200000"),
            tvm: None,
            holders: None,
            apy: dec("18.5"),
            apy_base: dec("16"),
            apy_reward: dec("2.5"),
            total_issuance: None,
        }],
        staking: vec![BifrostStakingRow {
            contract_address: None,
            symbol: "vKSM".to_string(),
            slug: None,
            base_slug: None,
            unstaking_time: None,
            users: None,
            apr: None,
            fee: None,
            price: dec("42.5"),
            exchange_ratio: None,
            supply: None,
        }],
    }
}

fn hydration_rows() -> Vec<HydrationRow> {
    vec![HydrationRow {
        asset_id: "5".to_string(),
        symbol: "DOT".to_string(),
        farm_apr: 3.0,
        pool_apr: 1.5,
        total_apr: 4.5,
        tvl_usd: 2_000_000.0,
        volume_usd: 150_000.0,
        observed_at: "2026-01-01T00:00:00Z".to_string(),
    }]
}

fn prices(dot: f64) -> Vec<PriceRow> {
    vec![PriceRow {
        asset_id: "5".to_string(),
        symbol: "DOT".to_string(),
        price_usdt: dot,
    }]
}

fn pools() -> Vec<PoolRow> {
    vec![PoolRow {
        pool_id: "0xab".to_string(),
        token0_symbol: "WGLMR".to_string(),
        token1_symbol: "xcDOT".to_string(),
        liquidity: 1_000.0,
        volume_usd_24h: 25_000.0,
        tx_count: 812,
        fees_usd_24h: 62.5,
        amount_token0: 10.0,
        amount_token1: 20.0,
        pools_apr: 12.0,
        farming_apr: 8.0,
        final_apr: 20.0,
    }]
}

fn seed(f: &mut Fixture) {
    BifrostStore::new(&f.tables)
        .insert_batch_at(&mut f.conn, 1_000, Some("b"), &bifrost_batch(), 1_700_000_000)
        .unwrap();
    HydrationStore::new(&f.tables)
        .insert_batch_at(&mut f.conn, 2_000, Some("h"), &hydration_rows(), 1_700_000_100)
        .unwrap();
    HydrationPriceStore::new(&f.tables)
        .insert_batch_at(&mut f.conn, 3_000, Some("p"), &prices(7.25), 1_700_000_200)
        .unwrap();
    StellaswapStore::new(&f.tables)
        .insert_batch_at(&mut f.conn, 4_000, Some("s"), &pools(), 1_700_000_300)
        .unwrap();
}

fn latest_payload(conn: &Connection, tables: &TableNames) -> Value {
    let text: String = conn
        .query_row(
            &format!("SELECT payload FROM {} ORDER BY id DESC LIMIT 1", tables.unified_snapshots),
            [],
            |row| row.get(0),
        )
        .unwrap();
    serde_json::from_str(&text).unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_snapshot_dedup_and_new_content() {
    let mut f = fixture();
    seed(&mut f);
    let mut engine = MergeEngine::open(&f.db, &f.tables, &MergeConfig { interval_secs: 60, write_rows: false }).unwrap();

    let first_hash = match engine.run_once().unwrap() {
        MergeOutcome::Inserted { rows, content_hash, .. } => {
            assert_eq!(rows, 4);
            content_hash.unwrap()
        }
        other => panic!("expected a snapshot, got {:?}", other),
    };

    assert_eq!(
        engine.run_once().unwrap(),
        MergeOutcome::Duplicate { content_hash: first_hash.clone() }
    );
    assert_eq!(count(&f.conn, &f.tables.unified_snapshots), 1);

    HydrationPriceStore::new(&f.tables)
        .insert_batch_at(&mut f.conn, 3_001, Some("p2"), &prices(7.5), 1_700_000_400)
        .unwrap();
    match engine.run_once().unwrap() {
        MergeOutcome::Inserted { content_hash, .. } => assert_ne!(content_hash.unwrap(), first_hash),
        other => panic!("expected a new snapshot, got {:?}", other),
    }
    assert_eq!(count(&f.conn, &f.tables.unified_snapshots), 2);

    let payload = latest_payload(&f.conn, &f.tables);
    assert_eq!(payload["batch_id_hydration_price"], json!(3_001));
    assert_eq!(payload["hydration_data"][0]["price"], json!(7.5));
    // vKSM has no primary price; the staking price fills the gap
    assert_eq!(payload["bifrost_data"][0]["price"], json!(42.5));
    assert_eq!(payload["moonbeam_data"][0]["tx"], json!(812));
    assert_eq!(payload["moonbeam_data"][0]["price"], Value::Null);
    assert_eq!(payload["moonbeam_data"][0]["token1_symbol"], json!("xcDOT"));
    assert_eq!(payload["bifrost_data"][0]["symbol"], json!("vKSM"));
    assert_eq!(
        payload["hydration_price_data"],
        json!([{"asset_id": "5", "symbol": "DOT", "price_usdt": 7.5}])
    );
    assert_eq!(payload["combined_created_at"], json!("2023-11-14T22:20:00+00:00"));
}

#[test]
fn test_full_table_rows_written_only_for_new_snapshots() {
    let mut f = fixture();
    seed(&mut f);
    let mut engine = MergeEngine::open(&f.db, &f.tables, &MergeConfig { interval_secs: 60, write_rows: true }).unwrap();

    engine.run_once().unwrap();
    engine.run_once().unwrap();
    assert_eq!(count(&f.conn, &f.tables.full_table), 4);

    let (chain, symbol, apy): (String, String, f64) = f
        .conn
        .query_row(
            &format!(
                "SELECT chain_label, symbol_json, apy FROM {} WHERE source = 'stellaswap'",
                f.tables.full_table
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(chain, "moonbeam");
    assert_eq!(symbol, r#"{"token0_symbol":"WGLMR","token1_symbol":"xcDOT"}"#);
    assert_eq!(apy, 20.0);
}

#[test]
fn test_unreadable_source_degrades_to_empty() {
    let mut f = fixture();
    seed(&mut f);
    f.conn
        .execute_batch(&format!("DROP TABLE {}", f.tables.pool_data))
        .unwrap();

    let mut engine = MergeEngine::open(&f.db, &f.tables, &MergeConfig { interval_secs: 60, write_rows: false }).unwrap();
    match engine.run_once().unwrap() {
        MergeOutcome::Inserted { rows, .. } => assert_eq!(rows, 3),
        other => panic!("expected a snapshot, got {:?}", other),
    }

    let payload = latest_payload(&f.conn, &f.tables);
    assert_eq!(payload["moonbeam_data"], json!([]));
    assert_eq!(payload["batch_id_moonbeam"], Value::Null);
    assert_eq!(payload["batch_id_bifrost"], json!(1_000));
}

#[test]
fn test_empty_database_still_snapshots_once() {
    let f = fixture();
    let mut engine = MergeEngine::open(&f.db, &f.tables, &MergeConfig { interval_secs: 60, write_rows: false }).unwrap();

    assert!(matches!(engine.run_once().unwrap(), MergeOutcome::Inserted { rows: 0, .. }));
    assert!(matches!(engine.run_once().unwrap(), MergeOutcome::Duplicate { .. }));
}
