use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::RoomkeepAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability as obs;
use crate::sql::{self, Command, SqlError};

pub struct RoomkeepHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomkeepQueryParser>,
}

impl RoomkeepHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomkeepQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(obs::QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
            sql_err(e)
        })?;
        let label = obs::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(obs::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(obs::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { id, name, rate, status } => {
                engine.create_room(id, name, rate, status).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::UpdateRoom { id, name, rate, status } => {
                engine
                    .update_room(id, name, rate, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::InsertReservation(req) => {
                engine.create_reservation(req).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertGuest { reservation_id, guest } => {
                engine.add_guest(reservation_id, guest).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::ChangeStatus { reservation_id, status } => {
                engine
                    .update_status(reservation_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::RecordPayment { reservation_id, record } => {
                engine
                    .record_payment(reservation_id, record)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::PaymentNotification(notification) => {
                engine
                    .apply_payment_notification(&notification)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                rows(rooms_schema(), rooms.iter(), encode_room)
            }
            Command::SelectReservations(filter) => {
                let reservations = engine.list_reservations(&filter).await;
                rows(reservations_schema(), reservations.iter(), encode_reservation)
            }
            Command::SelectUnavailableDates { room_id } => {
                let dates = engine.unavailable_dates(room_id).await.map_err(engine_err)?;
                rows(unavailable_dates_schema(), dates.iter(), |enc, date| {
                    enc.encode_field(date)
                })
            }
            Command::SelectAvailability { room_id, stay } => {
                let check = engine
                    .check_availability(room_id, &stay)
                    .await
                    .map_err(engine_err)?;
                rows(availability_schema(), std::iter::once(&check), encode_availability)
            }
            Command::SelectRoomStatus { room_id } => {
                let now = chrono::Local::now().naive_local();
                let statuses = match room_id {
                    Some(id) => vec![(id, engine.reconcile(id, now).await.map_err(engine_err)?)],
                    None => engine.reconcile_all(now).await.map_err(engine_err)?,
                };
                rows(room_status_schema(), statuses.iter(), |enc, (id, status)| {
                    enc.encode_field(&id.to_string())?;
                    enc.encode_field(&status.as_str())
                })
            }
            Command::SelectPaymentCheckout { reservation_id } => {
                let checkout = engine
                    .payment_checkout(reservation_id)
                    .await
                    .map_err(engine_err)?;
                rows(checkout_schema(), std::iter::once(&checkout), |enc, c| {
                    enc.encode_field(&c.merchant_id)?;
                    enc.encode_field(&c.order_id)?;
                    enc.encode_field(&c.amount)?;
                    enc.encode_field(&c.currency)?;
                    enc.encode_field(&c.hash)
                })
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

/// Encode `items` as one data row each under `schema`.
fn rows<'a, T: 'a>(
    schema: Vec<FieldInfo>,
    items: impl Iterator<Item = &'a T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_room(enc: &mut DataRowEncoder, room: &RoomInfo) -> PgWireResult<()> {
    enc.encode_field(&room.id.to_string())?;
    enc.encode_field(&room.name)?;
    enc.encode_field(&room.rate.to_string())?;
    enc.encode_field(&room.status.as_str())
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    let primary = r.guest_details.first();
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.room_id.to_string())?;
    enc.encode_field(&r.stay.check_in.format(INSTANT_FORMAT).to_string())?;
    enc.encode_field(&r.stay.check_out.format(INSTANT_FORMAT).to_string())?;
    enc.encode_field(&r.stay.check_in_time.format(CLOCK_FORMAT).to_string())?;
    enc.encode_field(&r.stay.check_out_time.format(CLOCK_FORMAT).to_string())?;
    enc.encode_field(&i64::from(r.nights))?;
    enc.encode_field(&i64::from(r.guests))?;
    enc.encode_field(&primary.map(|g| g.name.clone()))?;
    enc.encode_field(&primary.map(|g| g.email.clone()))?;
    enc.encode_field(&r.status.as_str())?;
    enc.encode_field(&r.payment_status.as_str())?;
    enc.encode_field(&r.total_amount.to_string())?;
    enc.encode_field(&r.advance_paid.to_string())?;
    enc.encode_field(&r.final_amount.map(|m| m.to_string()))?;
    enc.encode_field(&r.amount_paid.map(|m| m.to_string()))?;
    enc.encode_field(&r.payment_reference)?;
    enc.encode_field(&r.special_requests)?;
    enc.encode_field(&r.created_at.to_rfc3339())
}

fn encode_availability(enc: &mut DataRowEncoder, check: &AvailabilityCheck) -> PgWireResult<()> {
    enc.encode_field(&check.room_id.to_string())?;
    enc.encode_field(&check.available)?;
    enc.encode_field(&check.conflicting.map(|id| id.to_string()))?;
    enc.encode_field(&i64::from(check.nights))?;
    enc.encode_field(&check.total.to_string())
}

const INSTANT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CLOCK_FORMAT: &str = "%H:%M";

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    ["id", "name", "rate", "status"].into_iter().map(text_field).collect()
}

fn reservations_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = ["id", "room_id", "check_in", "check_out", "check_in_time", "check_out_time"]
        .into_iter()
        .map(text_field)
        .collect();
    fields.push(int_field("nights"));
    fields.push(int_field("guests"));
    fields.extend(
        [
            "guest_name",
            "guest_email",
            "status",
            "payment_status",
            "total_amount",
            "advance_paid",
            "final_amount",
            "amount_paid",
            "payment_reference",
            "special_requests",
            "created_at",
        ]
        .into_iter()
        .map(text_field),
    );
    fields
}

fn unavailable_dates_schema() -> Vec<FieldInfo> {
    vec![text_field("date")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        text_field("conflicting_reservation"),
        int_field("nights"),
        text_field("total_amount"),
    ]
}

fn room_status_schema() -> Vec<FieldInfo> {
    vec![text_field("room_id"), text_field("status")]
}

fn checkout_schema() -> Vec<FieldInfo> {
    ["merchant_id", "order_id", "amount", "currency", "hash"]
        .into_iter()
        .map(text_field)
        .collect()
}

/// Result columns for a statement, from the table after `FROM`. Writes have none.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let mut words = sql.split_whitespace();
    if !words.next().is_some_and(|w| w.eq_ignore_ascii_case("select")) {
        return vec![];
    }
    let table = words
        .skip_while(|w| !w.eq_ignore_ascii_case("from"))
        .nth(1)
        .map(|t| t.trim_end_matches(';').to_ascii_lowercase());
    match table.as_deref() {
        Some("rooms") => rooms_schema(),
        Some("reservations") => reservations_schema(),
        Some("unavailable_dates") => unavailable_dates_schema(),
        Some("availability") => availability_schema(),
        Some("room_status") => room_status_schema(),
        Some("payment_checkout") => checkout_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomkeepHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomkeepQueryParser;

#[async_trait]
impl QueryParser for RoomkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomkeepHandler {
    type Statement = String;
    type QueryParser = RoomkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(&substitute_params(portal)).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with bound text parameters as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over `sql`; bound values are never rescanned.
/// Placeholders without a matching parameter are left as written.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomkeepFactory {
    handler: Arc<RoomkeepHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<RoomkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomkeepFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RoomkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomkeepHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one admin connection until the client disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>, password: String) -> std::io::Result<()> {
    let factory = RoomkeepFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::DatesUnavailable { .. } => "23P01",
        EngineError::NotFound(_) => "02000",
        EngineError::SignatureRejected(_) => "28000",
        EngineError::AlreadyExists(_) | EngineError::RoomInUse(_) | EngineError::WalError(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidValue { .. } => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
