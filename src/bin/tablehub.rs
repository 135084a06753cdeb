use std::fs;
use tablehub::catalog::schema::{Column, NewTable, Table};
use tablehub::clock::now_micros;
use tablehub::engine::{import_batch_size, new_column_id, new_table_id};
use tablehub::physical::provision_table_statements;

const DEFAULT_IMPORT_MAX_PARAMS: usize = 60_000;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "ddl" => cmd_ddl(&args[2..]),
        "batch-plan" => cmd_batch_plan(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_ddl(args: &[String]) -> Result<(), String> {
    let path = args.first().ok_or("missing <definition.json>")?;
    let raw = fs::read_to_string(path).map_err(|e| format!("read {path}: {e}"))?;
    let definition: NewTable =
        serde_json::from_str(&raw).map_err(|e| format!("parse {path}: {e}"))?;
    let columns = definition
        .columns
        .into_iter()
        .map(|spec| {
            spec.normalized()
                .map(|spec| Column::from_spec(new_column_id(), spec))
                .map_err(|e| e.to_string())
        })
        .collect::<Result<Vec<_>, String>>()?;
    let table = Table {
        id: new_table_id(),
        name: definition.name.trim().to_string(),
        database_id: definition.database_id,
        columns,
        created_at_micros: now_micros(),
        deleted_at_micros: None,
    };

    println!("-- table {} ({})", table.name, table.id);
    for column in &table.columns {
        println!("--   {}\t{}\t{}", column.id, column.column_type, column.name);
    }
    for statement in provision_table_statements(&table) {
        println!("{};", statement.to_sql().sql);
    }
    Ok(())
}

fn cmd_batch_plan(args: &[String]) -> Result<(), String> {
    let columns = parse_usize_flag(args, "--columns")?.ok_or("--columns is required")?;
    let rows = parse_usize_flag(args, "--rows")?.ok_or("--rows is required")?;
    let max_params = parse_usize_flag(args, "--max-params")?.unwrap_or(DEFAULT_IMPORT_MAX_PARAMS);

    let batch_size = import_batch_size(columns, max_params).map_err(|e| e.to_string())?;
    let batches = rows.div_ceil(batch_size);
    println!("columns\t{columns}");
    println!("rows\t{rows}");
    println!("max_params\t{max_params}");
    println!("batch_size\t{batch_size}");
    println!("params_per_batch\t{}", batch_size * (columns + 1));
    println!("batches\t{batches}");
    if batches > 0 {
        println!("last_batch_rows\t{}", rows - (batches - 1) * batch_size);
    }
    Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn parse_usize_flag(args: &[String], flag: &str) -> Result<Option<usize>, String> {
    parse_flag_value(args, flag)
        .map(|raw| raw.parse().map_err(|e| format!("invalid {flag} '{raw}': {e}")))
        .transpose()
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  tablehub ddl <definition.json>");
    eprintln!("  tablehub batch-plan --columns <n> --rows <m> [--max-params <p>]");
}
