//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

const REPLICA_COLUMNS: [&str; 7] = ["Replica", "Status", "View", "Seq", "Committed", "Log", "Alarm"];

/// Builds the per-replica state table. Numeric columns are right-aligned.
pub fn replica_table(rows: &[Vec<String>]) -> Table {
    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = REPLICA_COLUMNS
        .iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col)
                    .add_attribute(Attribute::Bold)
                    .fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .iter()
            .enumerate()
            .map(|(column, value)| {
                let cell = Cell::new(value);
                if column >= 2 {
                    cell.set_alignment(CellAlignment::Right)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    table
}

pub fn print_replica_table(rows: &[Vec<String>]) {
    println!("{}", replica_table(rows));
}
