use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::SuiteDrawAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, Report};
use crate::tenant::TenantManager;

pub struct SuiteDrawHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SuiteDrawQueryParser>,
}

impl SuiteDrawHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SuiteDrawQueryParser),
        }
    }

    /// The college is the database named in the startup message.
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

    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(tenant = %engine.tenant, command = label, "statement failed: {e}");
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertDraw {
                id,
                name,
                intent_locked,
                allow_clipping,
            } => {
                engine
                    .create_draw(id, name, intent_locked, allow_clipping)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AdvanceDraw { id, phase } => {
                engine.advance_draw(id, phase).await.map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::ArchiveDraw { id } => {
                engine.archive_draw(id).await.map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::SetDeadlines {
                id,
                intent_deadline,
                locking_deadline,
            } => {
                engine
                    .set_deadlines(id, intent_deadline, locking_deadline)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::InsertSuite {
                id,
                label,
                size,
                medical,
            } => {
                engine
                    .create_suite(id, label, size, medical)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AttachSuite { draw_id, suite_id } => {
                engine
                    .attach_suite(draw_id, suite_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DetachSuite { draw_id, suite_id } => {
                engine
                    .detach_suite(draw_id, suite_id)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertStudent { id, name, surname } => {
                engine
                    .create_student(id, name, surname)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::EnrollStudent {
                draw_id,
                student_id,
            } => {
                engine
                    .enroll_student(draw_id, student_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SetIntent { student_id, intent } => {
                engine
                    .set_intent(student_id, intent)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::InsertGroup {
                id,
                draw_id,
                leader_id,
                size,
            } => {
                engine
                    .create_group(id, draw_id, leader_id, size)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::LockGroup { id } => {
                engine.lock_group(id).await.map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::LockFullGroups { draw_id, size } => {
                let locked = engine
                    .lock_full_groups(draw_id, size)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(locked.len()))
            }
            Command::BeginFinalizing { id } => {
                engine.begin_finalizing(id).await.map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::DisbandGroup { id } => {
                engine.disband_group(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertMembership {
                group_id,
                student_id,
                status,
            } => {
                engine
                    .add_membership(group_id, student_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AcceptMembership {
                group_id,
                student_id,
            } => {
                engine
                    .accept_membership(group_id, student_id)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::ConfirmRoom {
                group_id,
                student_id,
            } => {
                engine
                    .confirm_room(group_id, student_id)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::DeleteMembership {
                group_id,
                student_id,
            } => {
                engine
                    .remove_membership(group_id, student_id)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertClip {
                id,
                draw_id,
                group_ids,
            } => {
                let rows = group_ids.len();
                engine
                    .create_clip(id, draw_id, group_ids)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(rows))
            }
            Command::ConfirmClip { clip_id, group_id } => {
                engine
                    .confirm_clip(clip_id, group_id)
                    .await
                    .map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::LeaveClip { clip_id, group_id } => {
                engine
                    .leave_clip(clip_id, group_id)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::RestrictSize { draw_id, size } => {
                engine
                    .restrict_size(draw_id, size)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::UnrestrictSize { draw_id, size } => {
                engine
                    .unrestrict_size(draw_id, size)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::RunLottery { draw_id } => {
                let numbered = engine.run_lottery(draw_id).await.map_err(engine_err)?;
                Ok(inserted(numbered.len()))
            }
            Command::AssignSuite {
                group_id,
                suite_id,
                admin_override,
            } => {
                engine
                    .assign_suite(group_id, suite_id, admin_override)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::UnassignSuite { group_id } => {
                engine.unassign_suite(group_id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::ConfigureSort {
                direction,
                clip_bias,
                tie_break,
            } => {
                let current = engine.sort_config().await;
                let config = SortConfig {
                    direction: direction.unwrap_or(current.direction),
                    clip_bias: clip_bias.unwrap_or(current.clip_bias),
                    tie_break: tie_break.unwrap_or(current.tie_break),
                };
                engine.configure_sort(config).await.map_err(engine_err)?;
                Ok(updated(1))
            }
            Command::Select { report, draw_id } => self.select(engine, report, draw_id).await,
        }
    }

    async fn select(
        &self,
        engine: &Engine,
        report: Report,
        draw_id: Option<Ulid>,
    ) -> PgWireResult<Response> {
        let schema = Arc::new(report_schema(report));
        let rows: Vec<PgWireResult<DataRow>> = match report {
            Report::Draws => {
                let draws = match draw_id {
                    Some(id) => vec![engine.get_draw(id).await.map_err(engine_err)?],
                    None => engine.list_draws().await,
                };
                draws.iter().map(|d| encode_draw(&schema, d)).collect()
            }
            Report::Suites => {
                let suites = engine.list_suites(draw_id).await.map_err(engine_err)?;
                suites.iter().map(|s| encode_suite(&schema, s)).collect()
            }
            Report::Students => {
                let students = engine.list_students(draw_id).await.map_err(engine_err)?;
                students.iter().map(|s| encode_student(&schema, s)).collect()
            }
            Report::Groups => {
                let groups = engine.list_groups(draw_id).await.map_err(engine_err)?;
                groups.iter().map(|g| encode_group(&schema, g)).collect()
            }
            Report::Lottery => {
                let results = engine
                    .lottery_results(required_draw(draw_id)?)
                    .await
                    .map_err(engine_err)?;
                results
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.unit.kind())?;
                        encoder.encode_field(&r.unit.id().to_string())?;
                        encoder.encode_field(&i64::from(r.sorting_size))?;
                        encoder.encode_field(&i64::from(r.number))?;
                        encoder.encode_field(&r.selected)?;
                        Ok(encoder.take_row())
                    })
                    .collect()
            }
            Report::Capacity => {
                let capacity = engine
                    .capacity_report(required_draw(draw_id)?)
                    .await
                    .map_err(engine_err)?;
                capacity
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i64::from(c.size))?;
                        encoder.encode_field(&i64::from(c.available))?;
                        encoder.encode_field(&i64::from(c.units))?;
                        encoder.encode_field(&c.delta())?;
                        encoder.encode_field(&c.oversubscribed())?;
                        Ok(encoder.take_row())
                    })
                    .collect()
            }
            Report::Oversubscription => {
                let deltas = engine
                    .oversubscription_report(required_draw(draw_id)?)
                    .await
                    .map_err(engine_err)?;
                deltas
                    .iter()
                    .map(|(size, delta)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i64::from(*size))?;
                        encoder.encode_field(delta)?;
                        Ok(encoder.take_row())
                    })
                    .collect()
            }
            Report::NextEligible => {
                let turn = engine
                    .next_eligible(required_draw(draw_id)?)
                    .await
                    .map_err(engine_err)?;
                turn.map(|t| t.units)
                    .unwrap_or_default()
                    .iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i64::from(u.number))?;
                        encoder.encode_field(&u.unit.kind())?;
                        encoder.encode_field(&u.unit.id().to_string())?;
                        encoder.encode_field(&i64::from(u.sorting_size))?;
                        encoder.encode_field(&join_ids(&u.pending_groups))?;
                        encoder.encode_field(&u.waiting)?;
                        Ok(encoder.take_row())
                    })
                    .collect()
            }
        };
        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn updated(rows: usize) -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(rows))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

fn required_draw(draw_id: Option<Ulid>) -> PgWireResult<Ulid> {
    draw_id.ok_or_else(|| sql_err(sql::SqlError::MissingFilter("draw_id")))
}

fn join_ids(ids: &[Ulid]) -> String {
    ids.iter().map(Ulid::to_string).collect::<Vec<_>>().join(",")
}

// ── Report rows ──────────────────────────────────────────────────

fn encode_draw(schema: &Arc<Vec<FieldInfo>>, d: &DrawInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    let restricted = d
        .restricted_sizes
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",");
    encoder.encode_field(&d.id.to_string())?;
    encoder.encode_field(&d.name)?;
    encoder.encode_field(&d.phase.as_str())?;
    encoder.encode_field(&d.active)?;
    encoder.encode_field(&d.intent_locked)?;
    encoder.encode_field(&d.allow_clipping)?;
    encoder.encode_field(&d.intent_deadline)?;
    encoder.encode_field(&d.locking_deadline)?;
    encoder.encode_field(&restricted)?;
    encoder.encode_field(&(d.students as i64))?;
    encoder.encode_field(&(d.suites as i64))?;
    encoder.encode_field(&(d.groups as i64))?;
    Ok(encoder.take_row())
}

fn encode_suite(schema: &Arc<Vec<FieldInfo>>, s: &SuiteInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.label)?;
    encoder.encode_field(&i64::from(s.size))?;
    encoder.encode_field(&s.medical)?;
    encoder.encode_field(&s.occupant.map(|g| g.to_string()))?;
    Ok(encoder.take_row())
}

fn encode_student(schema: &Arc<Vec<FieldInfo>>, s: &Student) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.name)?;
    encoder.encode_field(&s.surname)?;
    encoder.encode_field(&s.draw_id.map(|d| d.to_string()))?;
    encoder.encode_field(&s.intent.as_str())?;
    Ok(encoder.take_row())
}

fn encode_group(schema: &Arc<Vec<FieldInfo>>, g: &GroupInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&g.id.to_string())?;
    encoder.encode_field(&g.draw_id.map(|d| d.to_string()))?;
    encoder.encode_field(&g.leader_id.to_string())?;
    encoder.encode_field(&i64::from(g.size))?;
    encoder.encode_field(&g.status.as_str())?;
    encoder.encode_field(&join_ids(&g.members))?;
    encoder.encode_field(&g.suite_id.map(|s| s.to_string()))?;
    encoder.encode_field(&g.clip_id.map(|c| c.to_string()))?;
    encoder.encode_field(&g.lottery_number.map(i64::from))?;
    encoder.encode_field(&g.finalized)?;
    Ok(encoder.take_row())
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Column layout of every report. Rows are encoded in this order.
pub fn report_schema(report: Report) -> Vec<FieldInfo> {
    match report {
        Report::Draws => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("phase", Type::VARCHAR),
            field("active", Type::BOOL),
            field("intent_locked", Type::BOOL),
            field("allow_clipping", Type::BOOL),
            field("intent_deadline", Type::INT8),
            field("locking_deadline", Type::INT8),
            field("restricted_sizes", Type::VARCHAR),
            field("students", Type::INT8),
            field("suites", Type::INT8),
            field("groups", Type::INT8),
        ],
        Report::Suites => vec![
            field("id", Type::VARCHAR),
            field("label", Type::VARCHAR),
            field("size", Type::INT8),
            field("medical", Type::BOOL),
            field("group_id", Type::VARCHAR),
        ],
        Report::Students => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("surname", Type::VARCHAR),
            field("draw_id", Type::VARCHAR),
            field("intent", Type::VARCHAR),
        ],
        Report::Groups => vec![
            field("id", Type::VARCHAR),
            field("draw_id", Type::VARCHAR),
            field("leader_id", Type::VARCHAR),
            field("size", Type::INT8),
            field("status", Type::VARCHAR),
            field("members", Type::VARCHAR),
            field("suite_id", Type::VARCHAR),
            field("clip_id", Type::VARCHAR),
            field("lottery_number", Type::INT8),
            field("finalized", Type::BOOL),
        ],
        Report::Lottery => vec![
            field("unit_kind", Type::VARCHAR),
            field("unit_id", Type::VARCHAR),
            field("sorting_size", Type::INT8),
            field("number", Type::INT8),
            field("selected", Type::BOOL),
        ],
        Report::Capacity => vec![
            field("size", Type::INT8),
            field("available", Type::INT8),
            field("units", Type::INT8),
            field("delta", Type::INT8),
            field("oversubscribed", Type::BOOL),
        ],
        Report::Oversubscription => vec![field("size", Type::INT8), field("delta", Type::INT8)],
        Report::NextEligible => vec![
            field("number", Type::INT8),
            field("unit_kind", Type::VARCHAR),
            field("unit_id", Type::VARCHAR),
            field("sorting_size", Type::INT8),
            field("pending_groups", Type::VARCHAR),
            field("waiting", Type::BOOL),
        ],
    }
}

fn statement_schema(statement: &str) -> Vec<FieldInfo> {
    sql::select_report(statement).map_or_else(Vec::new, report_schema)
}

#[async_trait]
impl SimpleQueryHandler for SuiteDrawHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            responses.push(self.run(&engine, cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SuiteDrawQueryParser;

#[async_trait]
impl QueryParser for SuiteDrawQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SuiteDrawHandler {
    type Statement = String;
    type QueryParser = SuiteDrawQueryParser;

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
        self.run(&engine, cmd).await
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$n` placeholder in `sql`.
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

/// Substitute $1, $2, ... with bound parameters as quoted text literals.
/// One pass over the statement, so bound text is never rescanned.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
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

pub struct SuiteDrawFactory {
    handler: Arc<SuiteDrawHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SuiteDrawAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SuiteDrawFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SuiteDrawAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SuiteDrawHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SuiteDrawFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SuiteDrawFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
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
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM draws"), 0);
        assert_eq!(
            count_params("UPDATE memberships SET status = $3 WHERE group_id = $1 AND student_id = $2"),
            3
        );
        assert_eq!(count_params("SELECT '$' FROM draws WHERE id = $12"), 12);
    }

    #[test]
    fn bound_text_is_not_rescanned() {
        let params: Vec<Option<&[u8]>> = vec![Some(&b"a"[..]), Some(&b"cost $1 o'clock"[..]), None];
        assert_eq!(
            bind_params("SELECT $2, $1, $3, $4, $ FROM draws", &params),
            "SELECT 'cost $1 o''clock', 'a', NULL, $4, $ FROM draws"
        );
    }

    #[test]
    fn double_digit_placeholders_bind_whole() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(format!("v{i}"))).collect();
        assert_eq!(bind_params("$1 $10", &params), "'v1' 'v10'");
    }

    #[test]
    fn prepared_select_described_by_report() {
        let schema = statement_schema("SELECT * FROM capacity WHERE draw_id = $1");
        let names: Vec<&str> = schema.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["size", "available", "units", "delta", "oversubscribed"]);
        assert!(statement_schema("DELETE FROM groups WHERE id = $1").is_empty());
    }
}
