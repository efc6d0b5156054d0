use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// One row of a window INSERT, pre-normalization (day still raw).
#[derive(Debug, PartialEq)]
pub struct WindowRow {
    pub id: Ulid,
    pub day: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        id: Ulid,
        name: Option<String>,
        shared: bool,
        tz: chrono_tz::Tz,
    },
    UpdateResource {
        id: Ulid,
        name: Option<String>,
    },
    DeleteResource {
        id: Ulid,
    },
    /// Single-row window INSERT: create one window.
    InsertWindow {
        resource_id: Ulid,
        row: WindowRow,
    },
    /// Multi-row window INSERT: atomically replace the whole weekly set.
    ReplaceWindows {
        resource_id: Ulid,
        rows: Vec<WindowRow>,
    },
    UpdateWindow {
        id: Ulid,
        start_time: NaiveTime,
        end_time: NaiveTime,
        active: bool,
    },
    DeleteWindow {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        capacity: Option<u32>,
        label: Option<String>,
    },
    InsertSeries {
        id: Ulid,
        resource_id: Ulid,
        day: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: Option<u32>,
        label: Option<String>,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertAttendee {
        occurrence_id: Ulid,
        attendee_id: Ulid,
    },
    DeleteAttendee {
        occurrence_id: Ulid,
        attendee_id: Ulid,
    },
    SelectResources,
    SelectWindows {
        resource_id: Ulid,
    },
    SelectOccurrences {
        resource_id: Ulid,
    },
    SelectAvailability {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if trimmed.to_uppercase().starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "resources" => {
            let values = extract_insert_values(insert)?;
            if values.is_empty() {
                return Err(SqlError::WrongArity("resources", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            let shared = if values.len() >= 3 {
                parse_kind(&values[2])?
            } else {
                false
            };
            let tz = if values.len() >= 4 {
                parse_tz(&values[3])?
            } else {
                chrono_tz::UTC
            };
            Ok(Command::InsertResource { id, name, shared, tz })
        }
        "windows" => {
            let all_rows = extract_all_insert_rows(insert)?;
            let mut resource_id = None;
            let mut rows = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                if row.len() < 6 {
                    return Err(SqlError::WrongArity("windows row", 6, row.len()));
                }
                let rid = parse_ulid(&row[1])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match resource_id {
                    None => resource_id = Some(rid),
                    Some(prev) if prev != rid => {
                        return Err(SqlError::Parse(
                            "all window rows must target one resource".into(),
                        ));
                    }
                    Some(_) => {}
                }
                rows.push(WindowRow {
                    id: parse_ulid(&row[0])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    day: parse_i64(&row[2])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    start_time: parse_time(&row[3])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    end_time: parse_time(&row[4])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    active: parse_bool(&row[5])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                });
            }
            let resource_id = resource_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
            if rows.len() == 1 {
                let row = rows.remove(0);
                Ok(Command::InsertWindow { resource_id, row })
            } else {
                Ok(Command::ReplaceWindows { resource_id, rows })
            }
        }
        "bookings" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let capacity = if values.len() >= 5 {
                parse_u32_or_null(&values[4])?
            } else {
                None
            };
            let label = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                capacity,
                label,
            })
        }
        "series" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 7 {
                return Err(SqlError::WrongArity("series", 7, values.len()));
            }
            let capacity = if values.len() >= 8 {
                parse_u32_or_null(&values[7])?
            } else {
                None
            };
            let label = if values.len() >= 9 {
                parse_string_or_null(&values[8])?
            } else {
                None
            };
            Ok(Command::InsertSeries {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                day: parse_i64(&values[2])?,
                start_date: parse_date(&values[3])?,
                end_date: parse_date(&values[4])?,
                start_time: parse_time(&values[5])?,
                end_time: parse_time(&values[6])?,
                capacity,
                label,
            })
        }
        "attendees" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("attendees", 2, values.len()));
            }
            Ok(Command::InsertAttendee {
                occurrence_id: parse_ulid(&values[0])?,
                attendee_id: parse_ulid(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "resources" => {
            let name_expr = assignment_value(assignments, "name")
                .ok_or(SqlError::MissingFilter("name"))?;
            Ok(Command::UpdateResource {
                id,
                name: parse_string_or_null(name_expr)?,
            })
        }
        "windows" => {
            let start_time = assignment_value(assignments, "start_time")
                .ok_or(SqlError::MissingFilter("start_time"))
                .and_then(parse_time)?;
            let end_time = assignment_value(assignments, "end_time")
                .ok_or(SqlError::MissingFilter("end_time"))
                .and_then(parse_time)?;
            let active = match assignment_value(assignments, "active") {
                Some(expr) => parse_bool(expr)?,
                None => true,
            };
            Ok(Command::UpdateWindow {
                id,
                start_time,
                end_time,
                active,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    if table == "attendees" {
        let filters = collect_eq_filters(delete.selection.as_ref());
        let occurrence_id = filters
            .iter()
            .find(|(c, _)| c == "occurrence_id")
            .map(|(_, e)| parse_ulid(e))
            .transpose()?
            .ok_or(SqlError::MissingFilter("occurrence_id"))?;
        let attendee_id = filters
            .iter()
            .find(|(c, _)| c == "attendee_id")
            .map(|(_, e)| parse_ulid(e))
            .transpose()?
            .ok_or(SqlError::MissingFilter("attendee_id"))?;
        return Ok(Command::DeleteAttendee {
            occurrence_id,
            attendee_id,
        });
    }

    let id = extract_where_id(&delete.selection)?;
    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "windows" => Ok(Command::DeleteWindow { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "windows" => Ok(Command::SelectWindows {
            resource_id: extract_resource_id_filter(&select.selection)?,
        }),
        "occurrences" => Ok(Command::SelectOccurrences {
            resource_id: extract_resource_id_filter(&select.selection)?,
        }),
        "availability" => {
            let (mut resource_id, mut start, mut end, mut min_duration) =
                (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(
                    selection,
                    &mut resource_id,
                    &mut start,
                    &mut end,
                    &mut min_duration,
                )?;
            }
            Ok(Command::SelectAvailability {
                resource_id: resource_id.ok_or(SqlError::MissingFilter("resource_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                min_duration,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    resource_id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    min_duration: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, resource_id, start, end, min_duration)?;
                extract_availability_filters(right, resource_id, start, end, min_duration)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("resource_id") {
                    *resource_id = Some(parse_ulid(right)?);
                } else if col.as_deref() == Some("min_duration") {
                    *min_duration = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Flatten a WHERE tree of AND-joined `col = value` terms.
fn collect_eq_filters(selection: Option<&Expr>) -> Vec<(String, Expr)> {
    let mut out = Vec::new();
    fn walk(expr: &Expr, out: &mut Vec<(String, Expr)>) {
        if let Expr::BinaryOp { left, op, right } = expr {
            match op {
                ast::BinaryOperator::And => {
                    walk(left, out);
                    walk(right, out);
                }
                ast::BinaryOperator::Eq => {
                    if let Some(col) = expr_column_name(left) {
                        out.push((col, (**right).clone()));
                    }
                }
                _ => {}
            }
        }
    }
    if let Some(expr) = selection {
        walk(expr, &mut out);
    }
    out
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    collect_eq_filters(selection.as_ref())
        .iter()
        .find(|(c, _)| c == "id")
        .map(|(_, e)| parse_ulid(e))
        .transpose()?
        .ok_or(SqlError::MissingFilter("id"))
}

fn extract_resource_id_filter(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    collect_eq_filters(selection.as_ref())
        .iter()
        .find(|(c, _)| c == "resource_id")
        .map(|(_, e)| parse_ulid(e))
        .transpose()?
        .ok_or(SqlError::MissingFilter("resource_id"))
}

fn assignment_value<'a>(assignments: &'a [ast::Assignment], col: &str) -> Option<&'a Expr> {
    assignments.iter().find_map(|a| match &a.target {
        ast::AssignmentTarget::ColumnName(name)
            if object_name_last(name).as_deref() == Some(col) =>
        {
            Some(&a.value)
        }
        _ => None,
    })
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_string(expr)?))
    }
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let v = parse_i64(expr)?;
    u32::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// `'exclusive'` / `'shared'` — returns true for shared.
fn parse_kind(expr: &Expr) -> Result<bool, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "exclusive" => Ok(false),
        "shared" => Ok(true),
        other => Err(SqlError::Parse(format!("bad kind: {other}"))),
    }
}

fn parse_tz(expr: &Expr) -> Result<chrono_tz::Tz, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("unknown timezone: {s}")))
}

/// `'HH:MM'` or `'HH:MM:SS'`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|_| SqlError::Parse(format!("bad time: {s}")))
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SqlError::Parse(format!("bad date: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
