//! Captured card log (`cards.csv`) and its sortable table
//!
//! Each line looks like
//! `DATA_TYPE: CARD, Bit_Length: 26, Hex_Value: 2004A2, Facility_Code: 18, Card_Number: 1234, BIN: ...`.
//! Keypad presses are logged one digit per line and are folded into a single
//! PIN row.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use tracing::{trace, warn};

/// A table cell: numeric when the device logged a number, text otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Number(u64),
    Text(String),
}

impl Cell {
    fn parse(raw: &str) -> Self {
        raw.parse()
            .map(Cell::Number)
            .unwrap_or_else(|_| Cell::Text(raw.to_string()))
    }

    fn is_zero(&self) -> bool {
        matches!(self, Cell::Number(0))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl Ord for Cell {
    /// Numbers before text; numbers numerically, text lexically
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.cmp(b),
            (Cell::Number(_), Cell::Text(_)) => Ordering::Less,
            (Cell::Text(_), Cell::Number(_)) => Ordering::Greater,
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One displayed row: bit length, facility code, card number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardRow {
    #[serde(rename = "BL")]
    pub bit_length: Cell,
    #[serde(rename = "FC")]
    pub facility_code: Cell,
    #[serde(rename = "CN")]
    pub card_number: Cell,
}

impl CardRow {
    fn pin(digits: &[Cell]) -> Self {
        let joined: String = digits.iter().map(Cell::to_string).collect();
        Self {
            bit_length: Cell::Text("PIN".into()),
            facility_code: Cell::Text("N/A".into()),
            card_number: Cell::Text(joined),
        }
    }

    pub fn get(&self, column: Column) -> &Cell {
        match column {
            Column::BitLength => &self.bit_length,
            Column::FacilityCode => &self.facility_code,
            Column::CardNumber => &self.card_number,
        }
    }
}

struct LogLine {
    data_type: String,
    bit_length: Cell,
    facility_code: Cell,
    card_number: Cell,
}

/// Value after the first `:` of a `Key: value` field
fn field_value(field: &str) -> Option<&str> {
    field.split_once(':').map(|(_, value)| value.trim())
}

fn parse_line(line: &str) -> Option<LogLine> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 5 {
        return None;
    }
    Some(LogLine {
        data_type: field_value(parts[0])?.to_string(),
        bit_length: Cell::parse(field_value(parts[1])?),
        facility_code: Cell::parse(field_value(parts[3])?),
        card_number: Cell::parse(field_value(parts[4])?),
    })
}

/// Parse the card log into display rows
pub fn parse_cards_csv(text: &str) -> Vec<CardRow> {
    let mut rows = Vec::new();
    let mut keypad: Vec<Cell> = Vec::new();

    for (lineno, line) in text.lines().map(str::trim).enumerate() {
        if line.is_empty() {
            continue;
        }
        let Some(entry) = parse_line(line) else {
            warn!(lineno, line, "Skipping malformed card log line");
            continue;
        };

        if entry.data_type == "KEYPAD" {
            keypad.push(entry.card_number);
            continue;
        }

        if !keypad.is_empty() {
            rows.push(CardRow::pin(&keypad));
            keypad.clear();
        }
        if entry.facility_code.is_zero() && entry.card_number.is_zero() {
            trace!(lineno, "Hiding empty card read");
            continue;
        }
        rows.push(CardRow {
            bit_length: entry.bit_length,
            facility_code: entry.facility_code,
            card_number: entry.card_number,
        });
    }

    if !keypad.is_empty() {
        rows.push(CardRow::pin(&keypad));
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    BitLength,
    FacilityCode,
    CardNumber,
}

impl Column {
    pub const ALL: [Column; 3] = [Column::BitLength, Column::FacilityCode, Column::CardNumber];

    /// Header key used by the page (`BL`, `FC`, `CN`)
    pub fn key(&self) -> &'static str {
        match self {
            Column::BitLength => "BL",
            Column::FacilityCode => "FC",
            Column::CardNumber => "CN",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Column::ALL.into_iter().find(|c| c.key().eq_ignore_ascii_case(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Captured cards with per-column sort toggles
#[derive(Debug, Clone, Default)]
pub struct CardTable {
    rows: Vec<CardRow>,
    /// Last order applied per column, indexed like [`Column::ALL`]
    orders: [Option<SortOrder>; 3],
}

impl CardTable {
    pub fn parse(text: &str) -> Self {
        Self {
            rows: parse_cards_csv(text),
            orders: [None; 3],
        }
    }

    pub fn rows(&self) -> &[CardRow] {
        &self.rows
    }

    /// Header click: the first toggle of a column sorts descending, then alternates
    pub fn toggle_sort(&mut self, column: Column) -> SortOrder {
        let slot = &mut self.orders[column as usize];
        let order = match slot {
            Some(SortOrder::Descending) => SortOrder::Ascending,
            Some(SortOrder::Ascending) | None => SortOrder::Descending,
        };
        *slot = Some(order);
        self.sort_by(column, order);
        order
    }

    pub fn sort_by(&mut self, column: Column, order: SortOrder) {
        self.rows.sort_by(|a, b| {
            let ord = a.get(column).cmp(b.get(column));
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
    }
}
