use std::collections::HashSet;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};

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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use ulid::Ulid;

use crate::auth::SlotdAuthSource;
use crate::engine::{Engine, WindowSpec};
use crate::model::*;
use crate::observability;
use crate::recurrence::SeriesPattern;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Subscription changes, handed from the query handler to the
/// notification pump of the same connection.
enum SubControl {
    Listen {
        channel: String,
        rx: broadcast::Receiver<Event>,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub struct SlotdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotdQueryParser>,
    subs_tx: mpsc::UnboundedSender<SubControl>,
    /// Channels this connection already listens on; re-LISTEN is a no-op.
    subscribed: Mutex<HashSet<String>>,
}

impl SlotdHandler {
    fn new(tenant_manager: Arc<TenantManager>, subs_tx: mpsc::UnboundedSender<SubControl>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotdQueryParser),
            subs_tx,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource { id, name, shared, tz } => {
                let kind = if shared {
                    ResourceKind::Shared
                } else {
                    ResourceKind::Exclusive
                };
                engine
                    .create_resource(id, name, kind, tz)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, name } => {
                engine.update_resource(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.delete_resource(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertWindow { resource_id, row } => {
                engine
                    .create_window(
                        row.id,
                        resource_id,
                        row.day,
                        row.start_time,
                        row.end_time,
                        row.active,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ReplaceWindows { resource_id, rows } => {
                let count = rows.len();
                let specs = rows
                    .into_iter()
                    .map(|r| WindowSpec {
                        id: Some(r.id),
                        day: r.day,
                        start_time: r.start_time,
                        end_time: r.end_time,
                        active: r.active,
                    })
                    .collect();
                engine
                    .replace_windows(resource_id, specs)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::UpdateWindow {
                id,
                start_time,
                end_time,
                active,
            } => {
                engine
                    .update_window(id, start_time, end_time, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteWindow { id } => {
                engine.remove_window(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                resource_id,
                start,
                end,
                capacity,
                label,
            } => {
                engine
                    .book_single(id, resource_id, Span { start, end }, capacity, label)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertSeries {
                id,
                resource_id,
                day,
                start_date,
                end_date,
                start_time,
                end_time,
                capacity,
                label,
            } => {
                let day = crate::engine::normalize_day(day).map_err(engine_err)?;
                let pattern = SeriesPattern {
                    day,
                    start_date,
                    end_date,
                    start_time,
                    end_time,
                };
                let ids = engine
                    .book_series(id, resource_id, pattern, capacity, label)
                    .await
                    .map_err(engine_err)?;

                // Return the derived occurrence ids so the caller can cancel
                // or fill individual slots without another query.
                let schema = Arc::new(series_schema());
                let rows: Vec<PgWireResult<_>> = ids
                    .into_iter()
                    .map(|oid| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&oid.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_occurrence(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAttendee {
                occurrence_id,
                attendee_id,
            } => {
                engine
                    .add_attendee(occurrence_id, attendee_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteAttendee {
                occurrence_id,
                attendee_id,
            } => {
                engine
                    .remove_attendee(occurrence_id, attendee_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&match r.kind {
                            ResourceKind::Exclusive => "exclusive",
                            ResourceKind::Shared => "shared",
                        })?;
                        encoder.encode_field(&r.tz.name())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectWindows { resource_id } => {
                let windows = engine.get_windows(resource_id).await.map_err(engine_err)?;
                let schema = Arc::new(windows_schema());
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&w.resource_id.to_string())?;
                        encoder.encode_field(&(w.day as i16))?;
                        encoder.encode_field(&w.start_time.format("%H:%M").to_string())?;
                        encoder.encode_field(&w.end_time.format("%H:%M").to_string())?;
                        encoder.encode_field(&w.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOccurrences { resource_id } => {
                let occs = engine
                    .get_occurrences(resource_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(occurrences_schema());
                let rows: Vec<PgWireResult<_>> = occs
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.resource_id.to_string())?;
                        encoder.encode_field(&o.start)?;
                        encoder.encode_field(&o.end)?;
                        encoder.encode_field(&o.capacity.map(|c| c as i64))?;
                        encoder.encode_field(&(o.attendee_count as i64))?;
                        encoder.encode_field(&o.status.as_str())?;
                        encoder.encode_field(&o.label)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                resource_id,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .compute_availability(resource_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rid_str = resource_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let resource_id_str = channel.strip_prefix("resource_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected resource_{{id}})"),
                    )))
                })?;
                let resource_id = Ulid::from_string(resource_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;

                let fresh = self
                    .subscribed
                    .lock()
                    .expect("subscribed set poisoned")
                    .insert(channel.clone());
                if fresh {
                    let rx = engine.notify.subscribe(resource_id);
                    let _ = self.subs_tx.send(SubControl::Listen { channel, rx });
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                let removed = self
                    .subscribed
                    .lock()
                    .expect("subscribed set poisoned")
                    .remove(&channel);
                if removed {
                    let _ = self.subs_tx.send(SubControl::Unlisten { channel });
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.subscribed
                    .lock()
                    .expect("subscribed set poisoned")
                    .clear();
                let _ = self.subs_tx.send(SubControl::UnlistenAll);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![varchar("resource_id"), int8("start"), int8("end")]
}

fn series_schema() -> Vec<FieldInfo> {
    vec![varchar("occurrence_id")]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name"), varchar("kind"), varchar("tz")]
}

fn windows_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("resource_id"),
        FieldInfo::new("day".into(), None, None, Type::INT2, FieldFormat::Text),
        varchar("start_time"),
        varchar("end_time"),
        FieldInfo::new("active".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn occurrences_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("resource_id"),
        int8("start"),
        int8("end"),
        int8("capacity"),
        int8("attendee_count"),
        varchar("status"),
        varchar("label"),
    ]
}

/// Schema for the SELECT-shaped part of a statement, if any.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("SELECT") {
        if upper.contains("AVAILABILITY") {
            return availability_schema();
        }
        if upper.contains("OCCURRENCES") {
            return occurrences_schema();
        }
        if upper.contains("WINDOWS") {
            return windows_schema();
        }
        if upper.contains("RESOURCES") {
            return resources_schema();
        }
    }
    if upper.contains("INSERT") && upper.contains("SERIES") {
        return series_schema();
    }
    vec![]
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
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
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

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
        let mut responses = self.execute_command(&engine, cmd).await?;
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
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

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    fn new(
        tenant_manager: Arc<TenantManager>,
        password: String,
        subs_tx: mpsc::UnboundedSender<SubControl>,
    ) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(tenant_manager, subs_tx)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
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

// ── Connection entry point ───────────────────────────────────────

/// Serve one client connection.
///
/// LISTEN delivery needs writes outside the request/response loop, which
/// pgwire does not expose, so the socket fd is duplicated: pgwire owns one
/// handle for the protocol, and a per-connection pump writes complete
/// NotificationResponse frames to the other. Each frame is a single
/// `write_all`. With TLS enabled the raw fd carries ciphertext, so async
/// notification push is only available on plain connections.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let (subs_tx, mut subs_rx) = mpsc::unbounded_channel::<SubControl>();
    let factory = SlotdFactory::new(tenant_manager, password, subs_tx);

    if tls.is_some() {
        return pgwire::tokio::process_socket(socket, tls, factory).await;
    }

    let std_socket = socket.into_std()?;
    let push_socket = std_socket.try_clone()?;
    let socket = TcpStream::from_std(std_socket)?;
    let push = Arc::new(tokio::sync::Mutex::new(TcpStream::from_std(push_socket)?));

    let pump = tokio::spawn(async move {
        let mut forwarders: std::collections::HashMap<String, tokio::task::JoinHandle<()>> =
            std::collections::HashMap::new();
        while let Some(ctl) = subs_rx.recv().await {
            match ctl {
                SubControl::Listen { channel, rx } => {
                    let task =
                        tokio::spawn(forward_notifications(channel.clone(), rx, push.clone()));
                    if let Some(old) = forwarders.insert(channel, task) {
                        old.abort();
                    }
                }
                SubControl::Unlisten { channel } => {
                    if let Some(task) = forwarders.remove(&channel) {
                        task.abort();
                    }
                }
                SubControl::UnlistenAll => {
                    for (_, task) in forwarders.drain() {
                        task.abort();
                    }
                }
            }
        }
        // Handler dropped — the connection is closing.
        for (_, task) in forwarders.drain() {
            task.abort();
        }
    });

    let result = pgwire::tokio::process_socket(socket, None, factory).await;
    // Dropping the factory closed the control channel, so the pump tears down
    // its forwarders and exits on its own; wait for that rather than aborting
    // mid-write.
    let _ = pump.await;
    result
}

async fn forward_notifications(
    channel: String,
    mut rx: broadcast::Receiver<Event>,
    push: Arc<tokio::sync::Mutex<TcpStream>>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("notification subscriber lagged, dropped {n} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Ok(payload) = serde_json::to_string(&event) else {
            continue;
        };
        let frame = encode_notification(&channel, &payload);
        let mut socket = push.lock().await;
        if socket.write_all(&frame).await.is_err() {
            break;
        }
    }
}

/// Wire-encode a NotificationResponse: 'A', i32 length, i32 sender pid,
/// channel cstring, payload cstring.
fn encode_notification(channel: &str, payload: &str) -> Vec<u8> {
    let body_len = 4 + 4 + channel.len() + 1 + payload.len() + 1;
    let mut buf = Vec::with_capacity(1 + body_len);
    buf.push(b'A');
    buf.extend_from_slice(&(body_len as i32).to_be_bytes());
    buf.extend_from_slice(&0i32.to_be_bytes());
    buf.extend_from_slice(channel.as_bytes());
    buf.push(0);
    buf.extend_from_slice(payload.as_bytes());
    buf.push(0);
    buf
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("INSERT INTO bookings VALUES ($1, $2, $3, $4)"), 4);
        assert_eq!(count_params("WHERE a = $2 AND b = $1"), 2);
    }

    #[test]
    fn notification_frame_layout() {
        let frame = encode_notification("resource_x", "{}");
        assert_eq!(frame[0], b'A');
        let len = i32::from_be_bytes(frame[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 1);
        // channel and payload are NUL-terminated
        assert_eq!(frame[9 + "resource_x".len()], 0);
        assert_eq!(*frame.last().unwrap(), 0);
    }
}
