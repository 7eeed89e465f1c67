use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// One row of a multi-row booking INSERT. Every row repeats the booking
/// fields and contributes one room.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingValues {
    pub id: Ulid,
    pub hold_id: Option<Ulid>,
    pub guest: String,
    pub room_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub adults: u32,
    pub children: u32,
    pub method: PaymentMethod,
    pub declared_total: Money,
}

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertCategory {
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    },
    UpdateCategory {
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    },
    InsertRoom {
        id: Ulid,
        category_id: Ulid,
    },
    UpdateRoomStatus {
        id: Ulid,
        status: RoomStatus,
    },
    InsertHold {
        id: Ulid,
        category_id: Ulid,
        guest: String,
        check_in: Day,
        check_out: Day,
        adults: u32,
        children: u32,
    },
    DeleteHold {
        id: Ulid,
    },
    InsertBooking {
        rows: Vec<BookingValues>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    InsertPoolSlot {
        id: Ulid,
        date: Day,
        start_time: Ms,
        max_people: u32,
    },
    InsertPoolReservation {
        id: Ulid,
        slot_id: Ulid,
        guest: String,
    },
    DeletePoolReservation {
        id: Ulid,
    },
    CompletePoolReservation {
        id: Ulid,
    },
    SelectAvailability {
        category_id: Ulid,
        check_in: Day,
        check_out: Day,
        room_id: Option<Ulid>,
        exclude: Option<Ulid>,
    },
    SelectRooms {
        category_id: Option<Ulid>,
    },
    SelectReservations {
        id: Option<Ulid>,
    },
    SelectBookings {
        id: Option<Ulid>,
    },
    SelectPoolSlots {
        date: Option<Day>,
    },
    SelectPoolReservations {
        slot_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let values = &rows[0];

    match table.as_str() {
        "categories" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("categories", 3, values.len()));
            }
            Ok(Command::InsertCategory {
                id: parse_ulid(&values[0])?,
                base_price: parse_i64(&values[1])?,
                discount_percent: parse_u32(&values[2])?,
            })
        }
        "rooms" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rooms", 2, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                category_id: parse_ulid(&values[1])?,
            })
        }
        "holds" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("holds", 7, values.len()));
            }
            Ok(Command::InsertHold {
                id: parse_ulid(&values[0])?,
                category_id: parse_ulid(&values[1])?,
                guest: parse_string(&values[2])?,
                check_in: parse_day(&values[3])?,
                check_out: parse_day(&values[4])?,
                adults: parse_u32(&values[5])?,
                children: parse_u32(&values[6])?,
            })
        }
        "bookings" => {
            let mut parsed = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 10 {
                    return Err(SqlError::WrongArity("bookings row", 10, row.len()));
                }
                let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                parsed.push(BookingValues {
                    id: parse_ulid(&row[0]).map_err(row_err)?,
                    hold_id: parse_ulid_or_null(&row[1]).map_err(row_err)?,
                    guest: parse_string(&row[2]).map_err(row_err)?,
                    room_id: parse_ulid(&row[3]).map_err(row_err)?,
                    check_in: parse_day(&row[4]).map_err(row_err)?,
                    check_out: parse_day(&row[5]).map_err(row_err)?,
                    adults: parse_u32(&row[6]).map_err(row_err)?,
                    children: parse_u32(&row[7]).map_err(row_err)?,
                    method: parse_payment_method(&row[8]).map_err(row_err)?,
                    declared_total: parse_i64(&row[9]).map_err(row_err)?,
                });
            }
            // All rows must describe the same booking
            let first = &parsed[0];
            for row in &parsed[1..] {
                if row.id != first.id
                    || row.hold_id != first.hold_id
                    || row.guest != first.guest
                    || row.check_in != first.check_in
                    || row.check_out != first.check_out
                    || row.method != first.method
                    || row.declared_total != first.declared_total
                {
                    return Err(SqlError::Parse(
                        "booking rows disagree on shared fields".into(),
                    ));
                }
            }
            Ok(Command::InsertBooking { rows: parsed })
        }
        "pool_slots" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("pool_slots", 4, values.len()));
            }
            Ok(Command::InsertPoolSlot {
                id: parse_ulid(&values[0])?,
                date: parse_day(&values[1])?,
                start_time: parse_i64(&values[2])?,
                max_people: parse_u32(&values[3])?,
            })
        }
        "pool_reservations" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("pool_reservations", 3, values.len()));
            }
            Ok(Command::InsertPoolReservation {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                guest: parse_string(&values[2])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "holds" => Ok(Command::DeleteHold { id }),
        // Admin cancellation. Equivalent to setting the status, with the
        // same transition check.
        "bookings" => Ok(Command::UpdateBookingStatus {
            id,
            status: BookingStatus::Cancelled,
        }),
        "pool_reservations" => Ok(Command::DeletePoolReservation { id }),
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
        "categories" => {
            let mut base_price = None;
            let mut discount_percent = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "base_price" => base_price = Some(parse_i64(&a.value)?),
                    "discount_percent" => discount_percent = Some(parse_u32(&a.value)?),
                    col => return Err(SqlError::Parse(format!("unknown column: {col}"))),
                }
            }
            Ok(Command::UpdateCategory {
                id,
                base_price: base_price.ok_or(SqlError::MissingFilter("base_price"))?,
                discount_percent: discount_percent
                    .ok_or(SqlError::MissingFilter("discount_percent"))?,
            })
        }
        "rooms" => {
            let status = single_status_assignment(assignments)?;
            let status = RoomStatus::parse(&status)
                .ok_or_else(|| SqlError::Parse(format!("unknown room status: {status}")))?;
            Ok(Command::UpdateRoomStatus { id, status })
        }
        "bookings" => {
            let status = single_status_assignment(assignments)?;
            let status = BookingStatus::parse(&status)
                .ok_or_else(|| SqlError::Parse(format!("unknown booking status: {status}")))?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        "pool_reservations" => {
            let status = single_status_assignment(assignments)?;
            if status != "completed" {
                return Err(SqlError::Parse(format!(
                    "pool reservations only transition to completed, got: {status}"
                )));
            }
            Ok(Command::CompletePoolReservation { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_status_assignment(assignments: &[ast::Assignment]) -> Result<String, SqlError> {
    match assignments {
        [a] if assignment_column(a)? == "status" => parse_string(&a.value),
        _ => Err(SqlError::Parse("expected a single status assignment".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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
        "availability" => {
            let mut filters = AvailabilityFilters::default();
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectAvailability {
                category_id: filters
                    .category_id
                    .ok_or(SqlError::MissingFilter("category_id"))?,
                check_in: filters.check_in.ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: filters
                    .check_out
                    .ok_or(SqlError::MissingFilter("check_out"))?,
                room_id: filters.room_id,
                exclude: filters.exclude,
            })
        }
        "rooms" => Ok(Command::SelectRooms {
            category_id: extract_eq_filter(&select.selection, "category_id", parse_ulid)?,
        }),
        "reservations" | "holds" => Ok(Command::SelectReservations {
            id: extract_eq_filter(&select.selection, "id", parse_ulid)?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            id: extract_eq_filter(&select.selection, "id", parse_ulid)?,
        }),
        "pool_slots" => Ok(Command::SelectPoolSlots {
            date: extract_eq_filter(&select.selection, "date", parse_day)?,
        }),
        "pool_reservations" => Ok(Command::SelectPoolReservations {
            slot_id: extract_eq_filter(&select.selection, "slot_id", parse_ulid)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct AvailabilityFilters {
    category_id: Option<Ulid>,
    check_in: Option<Day>,
    check_out: Option<Day>,
    room_id: Option<Ulid>,
    exclude: Option<Ulid>,
}

fn extract_availability_filters(
    expr: &Expr,
    filters: &mut AvailabilityFilters,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, filters)?;
                extract_availability_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("category_id") => filters.category_id = Some(parse_ulid(right)?),
                Some("check_in") => filters.check_in = Some(parse_day(right)?),
                Some("check_out") => filters.check_out = Some(parse_day(right)?),
                Some("room_id") => filters.room_id = Some(parse_ulid(right)?),
                Some("exclude") => filters.exclude = Some(parse_ulid(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────────

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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

/// Optional `WHERE <column> = <value>` on a list query. Absent WHERE means
/// no filter; any other predicate is rejected.
fn extract_eq_filter<T>(
    selection: &Option<Expr>,
    column: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    let Some(sel) = selection else {
        return Ok(None);
    };
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse(right).map(Some),
        _ => Err(SqlError::MissingFilter(column)),
    }
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
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

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    Day::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad date (want YYYY-MM-DD): {s}")))
}

fn parse_payment_method(expr: &Expr) -> Result<PaymentMethod, SqlError> {
    let s = parse_string(expr)?;
    PaymentMethod::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown payment method: {s}")))
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

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ──────────────────────────────────────────────────────────────────

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
