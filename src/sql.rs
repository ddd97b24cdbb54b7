use chrono::{NaiveDateTime, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::interval::{parse_clock, parse_instant, resolve_stay};
use crate::engine::{PaymentRecord, ReservationRequest};
use crate::model::*;
use crate::payment::PaymentNotification;

/// Parsed command from SQL input.
///
/// Writes are `INSERT`s into command tables, positional values only; the
/// column list, if any, is ignored.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: Option<RoomStatus>,
    },
    UpdateRoom {
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: RoomStatus,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertReservation(ReservationRequest),
    InsertGuest {
        reservation_id: Ulid,
        guest: Guest,
    },
    ChangeStatus {
        reservation_id: Ulid,
        status: ReservationStatus,
    },
    RecordPayment {
        reservation_id: Ulid,
        record: PaymentRecord,
    },
    PaymentNotification(PaymentNotification),
    DeleteReservation {
        id: Ulid,
    },
    SelectRooms,
    SelectReservations(ReservationFilter),
    SelectUnavailableDates {
        room_id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        stay: Stay,
    },
    /// Reconcile (all rooms when `room_id` is unset) as of now and report.
    SelectRoomStatus {
        room_id: Option<Ulid>,
    },
    SelectPaymentCheckout {
        reservation_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Positional VALUES of one row, with the table name for error messages.
struct Row<'a> {
    table: &'static str,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn require(&self, min: usize) -> Result<(), SqlError> {
        if self.values.len() < min {
            return Err(SqlError::WrongArity(self.table, min, self.values.len()));
        }
        Ok(())
    }

    fn get(&self, i: usize) -> Option<&'a Expr> {
        self.values.get(i)
    }

    fn ulid(&self, i: usize, column: &'static str) -> Result<Ulid, SqlError> {
        let expr = self.get(i).ok_or(SqlError::WrongArity(self.table, i + 1, self.values.len()))?;
        parse_ulid_expr(expr, column)
    }

    fn text(&self, i: usize) -> Result<Option<String>, SqlError> {
        self.get(i).map_or(Ok(None), text_expr)
    }

    fn required_text(&self, i: usize, column: &'static str) -> Result<String, SqlError> {
        self.text(i)?.ok_or(SqlError::InvalidValue {
            column,
            value: "NULL".into(),
        })
    }

    fn money(&self, i: usize, column: &'static str) -> Result<Option<Money>, SqlError> {
        self.text(i)?
            .map(|s| Money::parse(&s).ok_or(SqlError::InvalidValue { column, value: s }))
            .transpose()
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let row = |table| Row { table, values: &values };

    match table.as_str() {
        "rooms" => {
            let row = row("rooms");
            row.require(3)?;
            Ok(Command::InsertRoom {
                id: row.ulid(0, "id")?,
                name: row.text(1)?,
                rate: required(row.money(2, "rate")?, "rate")?,
                status: row.text(3)?.map(|s| room_status(&s)).transpose()?,
            })
        }
        "room_changes" => {
            let row = row("room_changes");
            row.require(4)?;
            Ok(Command::UpdateRoom {
                id: row.ulid(0, "room_id")?,
                name: row.text(1)?,
                rate: required(row.money(2, "rate")?, "rate")?,
                status: room_status(&row.required_text(3, "status")?)?,
            })
        }
        "reservations" => parse_reservation(&row("reservations")).map(Command::InsertReservation),
        "reservation_guests" => {
            let row = row("reservation_guests");
            row.require(3)?;
            Ok(Command::InsertGuest {
                reservation_id: row.ulid(0, "reservation_id")?,
                guest: Guest {
                    name: row.required_text(1, "name")?,
                    email: row.required_text(2, "email")?,
                    phone: row.text(3)?,
                    address: row.text(4)?,
                },
            })
        }
        "status_changes" => {
            let row = row("status_changes");
            row.require(2)?;
            let text = row.required_text(1, "status")?;
            let status = ReservationStatus::parse(&text).ok_or(SqlError::InvalidValue {
                column: "status",
                value: text,
            })?;
            Ok(Command::ChangeStatus {
                reservation_id: row.ulid(0, "reservation_id")?,
                status,
            })
        }
        "payments" => {
            let row = row("payments");
            row.require(2)?;
            let text = row.required_text(1, "payment_status")?;
            let payment_status = PaymentStatus::parse(&text).ok_or(SqlError::InvalidValue {
                column: "payment_status",
                value: text,
            })?;
            Ok(Command::RecordPayment {
                reservation_id: row.ulid(0, "reservation_id")?,
                record: PaymentRecord {
                    payment_status,
                    discount_amount: row.money(2, "discount_amount")?,
                    discount_percentage: row.text(3)?.map(|s| basis_points(&s)).transpose()?,
                    final_amount: row.money(4, "final_amount")?,
                },
            })
        }
        "payment_notifications" => {
            let row = row("payment_notifications");
            row.require(6)?;
            Ok(Command::PaymentNotification(PaymentNotification {
                merchant_id: row.required_text(0, "merchant_id")?,
                order_id: row.required_text(1, "order_id")?,
                amount: row.required_text(2, "payhere_amount")?,
                currency: row.required_text(3, "payhere_currency")?,
                status_code: row.required_text(4, "status_code")?,
                signature: row.required_text(5, "md5sig")?,
                payment_id: row.text(6)?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(id, room_id, check_in, check_out, guests, guest_name, guest_email
///   [, guest_phone, guest_address, check_in_time, check_out_time,
///    total_amount, advance_paid, special_requests])`
fn parse_reservation(row: &Row<'_>) -> Result<ReservationRequest, SqlError> {
    row.require(7)?;
    let instant = |i: usize, column: &'static str| -> Result<NaiveDateTime, SqlError> {
        let s = row.required_text(i, column)?;
        parse_instant(&s).ok_or(SqlError::InvalidValue { column, value: s })
    };
    let clock = |i: usize, column: &'static str| -> Result<Option<NaiveTime>, SqlError> {
        row.text(i)?
            .map(|s| parse_clock(&s).ok_or(SqlError::InvalidValue { column, value: s }))
            .transpose()
    };
    let guests_text = row.required_text(4, "guests")?;
    let guests = guests_text.parse::<u32>().map_err(|_| SqlError::InvalidValue {
        column: "guests",
        value: guests_text.clone(),
    })?;

    Ok(ReservationRequest {
        id: row.ulid(0, "id")?,
        room_id: row.ulid(1, "room_id")?,
        check_in: instant(2, "check_in")?,
        check_out: instant(3, "check_out")?,
        check_in_time: clock(9, "check_in_time")?,
        check_out_time: clock(10, "check_out_time")?,
        guests,
        guest_details: vec![Guest {
            name: row.required_text(5, "guest_name")?,
            email: row.required_text(6, "guest_email")?,
            phone: row.text(7)?,
            address: row.text(8)?,
        }],
        total_amount: row.money(11, "total_amount")?,
        advance_paid: row.money(12, "advance_paid")?,
        special_requests: row.text(13)?,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let f = Filters(filters);

    match table.as_str() {
        "rooms" => {
            f.only(&[])?;
            Ok(Command::SelectRooms)
        }
        "reservations" => {
            f.only(&["room_id", "status", "payment_status"])?;
            let status = f
                .text("status")?
                .map(|s| {
                    ReservationStatus::parse(&s).ok_or(SqlError::InvalidValue { column: "status", value: s })
                })
                .transpose()?;
            let payment_status = f
                .text("payment_status")?
                .map(|s| {
                    PaymentStatus::parse(&s).ok_or(SqlError::InvalidValue {
                        column: "payment_status",
                        value: s,
                    })
                })
                .transpose()?;
            Ok(Command::SelectReservations(ReservationFilter {
                room_id: f.ulid("room_id")?,
                status,
                payment_status,
            }))
        }
        "unavailable_dates" => {
            f.only(&["room_id"])?;
            Ok(Command::SelectUnavailableDates {
                room_id: f.ulid("room_id")?.ok_or(SqlError::MissingFilter("room_id"))?,
            })
        }
        "availability" => {
            f.only(&["room_id", "check_in", "check_out", "check_in_time", "check_out_time"])?;
            let instant = |column: &'static str| -> Result<_, SqlError> {
                let s = f.text(column)?.ok_or(SqlError::MissingFilter(column))?;
                parse_instant(&s).ok_or(SqlError::InvalidValue { column, value: s })
            };
            let clock = |column: &'static str| -> Result<Option<NaiveTime>, SqlError> {
                f.text(column)?
                    .map(|s| parse_clock(&s).ok_or(SqlError::InvalidValue { column, value: s }))
                    .transpose()
            };
            Ok(Command::SelectAvailability {
                room_id: f.ulid("room_id")?.ok_or(SqlError::MissingFilter("room_id"))?,
                stay: resolve_stay(
                    instant("check_in")?,
                    instant("check_out")?,
                    clock("check_in_time")?,
                    clock("check_out_time")?,
                ),
            })
        }
        "room_status" => {
            f.only(&["room_id"])?;
            Ok(Command::SelectRoomStatus {
                room_id: f.ulid("room_id")?,
            })
        }
        "payment_checkout" => {
            f.only(&["reservation_id"])?;
            Ok(Command::SelectPaymentCheckout {
                reservation_id: f
                    .ulid("reservation_id")?
                    .ok_or(SqlError::MissingFilter("reservation_id"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs from a conjunction of equalities.
struct Filters<'a>(Vec<(String, &'a Expr)>);

impl<'a> Filters<'a> {
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
            Some((col, _)) => Err(SqlError::Unsupported(format!("filter on {col}"))),
            None => Ok(()),
        }
    }

    fn find(&self, column: &str) -> Option<&'a Expr> {
        self.0.iter().find(|(col, _)| col == column).map(|(_, e)| *e)
    }

    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.find(column).map_or(Ok(None), text_expr)
    }

    fn ulid(&self, column: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.find(column).map(|e| parse_ulid_expr(e, column)).transpose()
    }
}

fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_eq_filters(sel, &mut filters)?;
    let f = Filters(filters);
    f.only(&["id"])?;
    f.ulid("id")?.ok_or(SqlError::MissingFilter("id"))
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

/// Literal as text, `None` for NULL. Numbers keep their literal spelling,
/// so `10000.00` stays `"10000.00"` and `-2` stays `"-2"`.
fn text_expr(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return match extract_value(inner) {
            Some(Value::Number(n, _)) => Ok(Some(format!("-{n}"))),
            _ => Err(SqlError::Parse(format!("expected number after '-', got {inner}"))),
        };
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr, column: &'static str) -> Result<Ulid, SqlError> {
    let s = text_expr(expr)?.ok_or(SqlError::InvalidValue {
        column,
        value: "NULL".into(),
    })?;
    Ulid::from_string(s.trim()).map_err(|_| SqlError::InvalidValue { column, value: s })
}

fn required<T>(value: Option<T>, column: &'static str) -> Result<T, SqlError> {
    value.ok_or(SqlError::InvalidValue {
        column,
        value: "NULL".into(),
    })
}

fn room_status(s: &str) -> Result<RoomStatus, SqlError> {
    RoomStatus::parse(s).ok_or_else(|| SqlError::InvalidValue {
        column: "status",
        value: s.to_string(),
    })
}

/// `"12.5"` percent → 1250 basis points.
fn basis_points(s: &str) -> Result<u32, SqlError> {
    parse_hundredths(s)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| SqlError::InvalidValue {
            column: "discount_percentage",
            value: s.to_string(),
        })
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed SQL, but a literal that doesn't fit its column.
    InvalidValue { column: &'static str, value: String },
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue { column, value } => write!(f, "invalid {column}: {value}"),
        }
    }
}

impl std::error::Error for SqlError {}
