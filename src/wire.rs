use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::{PgWireBackendMessage, PgWireFrontendMessage};
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::auth::InnkeepAuthSource;
use crate::engine::{Engine, FinalizeRequest};
use crate::model::StayRange;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::PropertyManager;

pub struct InnkeepHandler {
    properties: Arc<PropertyManager>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(properties: Arc<PropertyManager>) -> Self {
        Self {
            properties,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("property error: {e}"),
            )))
        })
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertCategory {
                id,
                base_price,
                discount_percent,
            } => {
                engine
                    .create_category(id, base_price, discount_percent)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateCategory {
                id,
                base_price,
                discount_percent,
            } => {
                engine
                    .update_category(id, base_price, discount_percent)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertRoom { id, category_id } => {
                engine.create_room(id, category_id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoomStatus { id, status } => {
                engine.set_room_status(id, status).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertHold {
                id,
                category_id,
                guest,
                check_in,
                check_out,
                adults,
                children,
            } => {
                engine
                    .create_hold(
                        id,
                        category_id,
                        &guest,
                        StayRange::new(check_in, check_out),
                        adults,
                        children,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteHold { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { rows } => {
                let count = rows.len();
                let first = &rows[0];
                let req = FinalizeRequest {
                    id: first.id,
                    reservation_id: first.hold_id,
                    guest: first.guest.clone(),
                    stay: StayRange::new(first.check_in, first.check_out),
                    adults: first.adults,
                    children: first.children,
                    room_ids: rows.iter().map(|r| r.room_id).collect(),
                    declared_total: first.declared_total,
                    method: first.method,
                };
                engine.finalize_booking(req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(count),
                )])
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .advance_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertPoolSlot {
                id,
                date,
                start_time,
                max_people,
            } => {
                engine
                    .create_pool_slot(id, date, start_time, max_people)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertPoolReservation { id, slot_id, guest } => {
                engine
                    .reserve_pool_slot(id, slot_id, &guest)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeletePoolReservation { id } => {
                engine.cancel_pool_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::CompletePoolReservation { id } => {
                engine
                    .complete_pool_reservation(id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability {
                category_id,
                check_in,
                check_out,
                room_id,
                exclude,
            } => {
                let range = StayRange::new(check_in, check_out);
                let rows = match room_id {
                    // Point check: one row when the room is free, none otherwise
                    Some(room_id) => {
                        if engine
                            .is_room_available(room_id, &range, exclude)
                            .await
                            .map_err(engine_err)?
                        {
                            vec![crate::engine::AvailabilityRow {
                                room_id,
                                check_in,
                                check_out,
                            }]
                        } else {
                            vec![]
                        }
                    }
                    None => engine
                        .availability(category_id, &range)
                        .await
                        .map_err(engine_err)?,
                };

                let schema = Arc::new(availability_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|row| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&row.room_id.to_string())?;
                        encoder.encode_field(&row.check_in.to_string())?;
                        encoder.encode_field(&row.check_out.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(encoded),
                ))])
            }
            Command::SelectRooms { category_id } => {
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_rooms()
                    .await
                    .into_iter()
                    .filter(|r| category_id.is_none_or(|c| r.category_id == c))
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.category_id.to_string())?;
                        encoder.encode_field(&r.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations { id } => {
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_reservations()
                    .into_iter()
                    .filter(|r| id.is_none_or(|want| r.id == want))
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.guest)?;
                        encoder.encode_field(&r.room_id.to_string())?;
                        encoder.encode_field(&r.check_in.to_string())?;
                        encoder.encode_field(&r.check_out.to_string())?;
                        encoder.encode_field(&(r.adults as i64))?;
                        encoder.encode_field(&(r.children as i64))?;
                        encoder.encode_field(&r.price_per_night)?;
                        encoder.encode_field(&r.subtotal)?;
                        encoder.encode_field(&r.tax)?;
                        encoder.encode_field(&r.total)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.expires_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { id } => {
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_bookings()
                    .into_iter()
                    .filter(|b| id.is_none_or(|want| b.id == want))
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.guest)?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        encoder.encode_field(&b.check_in.to_string())?;
                        encoder.encode_field(&b.check_out.to_string())?;
                        encoder.encode_field(&b.price_per_night)?;
                        encoder.encode_field(&b.room_subtotal)?;
                        encoder.encode_field(&b.total)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.payment_method.as_str())?;
                        encoder.encode_field(&b.payment_status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectPoolSlots { date } => {
                let schema = Arc::new(pool_slots_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_pool_slots()
                    .await
                    .into_iter()
                    .filter(|s| date.is_none_or(|d| s.date == d))
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.date.to_string())?;
                        encoder.encode_field(&s.start_time)?;
                        encoder.encode_field(&(s.max_people as i64))?;
                        encoder.encode_field(&(s.reserved as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectPoolReservations { slot_id } => {
                let schema = Arc::new(pool_reservations_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_pool_reservations()
                    .await
                    .into_iter()
                    .filter(|r| slot_id.is_none_or(|want| r.slot_id == want))
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.slot_id.to_string())?;
                        encoder.encode_field(&r.guest)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                // Delivered as an unbounded row stream: one row per notice,
                // for as long as the client keeps the portal open.
                let rx = engine.notify.subscribe(&channel);
                let schema = Arc::new(listen_schema());
                let row_schema = schema.clone();
                let rows = stream::unfold(
                    (rx, channel, row_schema),
                    |(mut rx, channel, schema)| async move {
                        loop {
                            match rx.recv().await {
                                Ok(notice) => {
                                    let mut encoder = DataRowEncoder::new(schema.clone());
                                    let row = encoder
                                        .encode_field(&channel)
                                        .and_then(|()| encoder.encode_field(&notice.payload()))
                                        .map(|()| encoder.take_row());
                                    return Some((row, (rx, channel, schema)));
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(broadcast::error::RecvError::Closed) => return None,
                            }
                        }
                    },
                );
                Ok(vec![Response::Query(QueryResponse::new(schema, rows))])
            }
        }
    }
}

// ── Result schemas ──────────────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        text_field("check_in"),
        text_field("check_out"),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("category_id"),
        text_field("status"),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("guest"),
        text_field("room_id"),
        text_field("check_in"),
        text_field("check_out"),
        int8_field("adults"),
        int8_field("children"),
        int8_field("price_per_night"),
        int8_field("subtotal"),
        int8_field("tax"),
        int8_field("total"),
        text_field("status"),
        int8_field("expires_at"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("guest"),
        text_field("room_id"),
        text_field("check_in"),
        text_field("check_out"),
        int8_field("price_per_night"),
        int8_field("room_subtotal"),
        int8_field("total"),
        text_field("status"),
        text_field("method"),
        text_field("payment_status"),
    ]
}

fn pool_slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("date"),
        int8_field("start_time"),
        int8_field("max_people"),
        int8_field("reserved"),
    ]
}

fn pool_reservations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("slot_id"),
        text_field("guest"),
        text_field("status"),
        int8_field("created_at"),
    ]
}

fn listen_schema() -> Vec<FieldInfo> {
    vec![text_field("channel"), text_field("payload")]
}

/// Best-effort schema sniff for Describe, before the statement runs.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.trim_start().starts_with("LISTEN") {
        return listen_schema();
    }
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("POOL_RESERVATIONS") {
        pool_reservations_schema()
    } else if upper.contains("POOL_SLOTS") {
        pool_slots_schema()
    } else if upper.contains("RESERVATIONS") || upper.contains("HOLDS") {
        reservations_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// Startup handler that counts rejected logins before surfacing the error.
struct MeteredStartupHandler<H> {
    inner: H,
}

#[async_trait]
impl<H: StartupHandler> StartupHandler for MeteredStartupHandler<H> {
    async fn on_startup<C>(
        &self,
        client: &mut C,
        message: PgWireFrontendMessage,
    ) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let result = self.inner.on_startup(client, message).await;
        if let Err(PgWireError::InvalidPassword(_)) = &result {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        }
        result
    }
}

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        MeteredStartupHandler<
            CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
        >,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(properties: Arc<PropertyManager>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(properties)),
            auth_handler: Arc::new(MeteredStartupHandler {
                inner: CleartextPasswordAuthStartupHandler::new(auth_source, param_provider),
            }),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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

/// Serve one accepted TCP connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    properties: Arc<PropertyManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), io::Error> {
    let factory = Arc::new(InnkeepFactory::new(properties, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
