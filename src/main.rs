use anyhow::{bail, Result};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use peer_grouping::{
    export, get_all_ratings, get_all_students, insert_students, load_roster, setup_database,
    GroupingEngine,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let Some(file) = args.get(2) else {
                bail!("usage: peer-grouping import <roster.csv|roster.xml>");
            };
            run_import(Path::new(file))
        }
        Some("group") => run_group(args.get(2).map(PathBuf::from)),
        Some("matrix") => run_matrix(args.get(2).map(PathBuf::from)),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn db_path() -> PathBuf {
    env::var("PEER_GROUPING_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("grouping.db"))
}

fn open_store() -> Result<Connection> {
    let path = db_path();
    let conn = Connection::open(&path)?;
    setup_database(&conn)?;
    println!("✓ Store opened: {}", path.display());
    Ok(conn)
}

fn run_import(file: &Path) -> Result<()> {
    println!("📂 Importing roster from {}", file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let students = load_roster(file)?;
    println!("✓ Loaded {} students from file", students.len());

    let conn = open_store()?;
    let inserted = insert_students(&conn, &students)?;

    println!("✓ Inserted: {} students", inserted);
    println!("✓ Skipped duplicates: {}", students.len() - inserted);
    Ok(())
}

fn run_group(out: Option<PathBuf>) -> Result<()> {
    println!("👥 Computing grouping from current ratings");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_store()?;
    let roster = get_all_students(&conn)?;
    let ratings = get_all_ratings(&conn)?;
    println!("✓ Roster: {} students, {} ratings", roster.len(), ratings.len());

    let engine = GroupingEngine::new();
    let partition = engine.compute_grouping(&roster, &ratings, None);

    for (i, group) in partition.iter().enumerate() {
        let names: Vec<&str> = group.iter().map(|s| s.name.as_str()).collect();
        println!("  Group {}: {}", i + 1, names.join(", "));
    }
    println!("✓ {} groups formed", partition.len());

    if let Some(path) = out {
        let csv = export::grouping_csv(&partition)?;
        std::fs::write(&path, csv)?;
        println!("✓ Written: {}", path.display());
    }

    Ok(())
}

fn run_matrix(out: Option<PathBuf>) -> Result<()> {
    println!("🤝 Exporting relationship matrix");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_store()?;
    let roster = get_all_students(&conn)?;
    let ratings = get_all_ratings(&conn)?;

    let csv = export::relationship_matrix_csv(&roster, &ratings)?;

    match out {
        Some(path) => {
            std::fs::write(&path, csv)?;
            println!("✓ Written: {}", path.display());
        }
        None => print!("{}", csv),
    }

    Ok(())
}

fn print_usage() {
    println!("Peer Grouping System v{}", peer_grouping::VERSION);
    println!();
    println!("Usage:");
    println!("  peer-grouping import <roster.csv|roster.xml>   import the roster");
    println!("  peer-grouping group [out.csv]                  compute and print groups");
    println!("  peer-grouping matrix [out.csv]                 export the affinity matrix");
    println!();
    println!("The store location defaults to ./grouping.db;");
    println!("set PEER_GROUPING_DB to override.");
}
