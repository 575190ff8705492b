use std::collections::BTreeMap;
use std::str::FromStr;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_CLIP_GROUPS;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertDraw {
        id: Ulid,
        name: String,
        intent_locked: bool,
        allow_clipping: bool,
    },
    AdvanceDraw {
        id: Ulid,
        phase: DrawPhase,
    },
    ArchiveDraw {
        id: Ulid,
    },
    /// `None` leaves a deadline untouched; `Some(None)` clears it.
    SetDeadlines {
        id: Ulid,
        intent_deadline: Option<Option<Ms>>,
        locking_deadline: Option<Option<Ms>>,
    },
    InsertSuite {
        id: Ulid,
        label: String,
        size: Size,
        medical: bool,
    },
    AttachSuite {
        draw_id: Ulid,
        suite_id: Ulid,
    },
    DetachSuite {
        draw_id: Ulid,
        suite_id: Ulid,
    },
    InsertStudent {
        id: Ulid,
        name: String,
        surname: String,
    },
    EnrollStudent {
        draw_id: Ulid,
        student_id: Ulid,
    },
    SetIntent {
        student_id: Ulid,
        intent: Intent,
    },
    InsertGroup {
        id: Ulid,
        draw_id: Option<Ulid>,
        leader_id: Ulid,
        size: Size,
    },
    LockGroup {
        id: Ulid,
    },
    LockFullGroups {
        draw_id: Ulid,
        size: Option<Size>,
    },
    BeginFinalizing {
        id: Ulid,
    },
    DisbandGroup {
        id: Ulid,
    },
    InsertMembership {
        group_id: Ulid,
        student_id: Ulid,
        status: MembershipStatus,
    },
    AcceptMembership {
        group_id: Ulid,
        student_id: Ulid,
    },
    ConfirmRoom {
        group_id: Ulid,
        student_id: Ulid,
    },
    DeleteMembership {
        group_id: Ulid,
        student_id: Ulid,
    },
    /// One row per group; the first row's group initiates.
    InsertClip {
        id: Ulid,
        draw_id: Ulid,
        group_ids: Vec<Ulid>,
    },
    ConfirmClip {
        clip_id: Ulid,
        group_id: Ulid,
    },
    LeaveClip {
        clip_id: Ulid,
        group_id: Ulid,
    },
    RestrictSize {
        draw_id: Ulid,
        size: Size,
    },
    UnrestrictSize {
        draw_id: Ulid,
        size: Size,
    },
    RunLottery {
        draw_id: Ulid,
    },
    AssignSuite {
        group_id: Ulid,
        suite_id: Ulid,
        admin_override: bool,
    },
    UnassignSuite {
        group_id: Ulid,
    },
    /// Unset fields keep their current value.
    ConfigureSort {
        direction: Option<SortDirection>,
        clip_bias: Option<ClipBias>,
        tie_break: Option<TieBreak>,
    },
    Select {
        report: Report,
        draw_id: Option<Ulid>,
    },
}

/// Read-only tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Draws,
    Suites,
    Students,
    Groups,
    Lottery,
    Capacity,
    Oversubscription,
    NextEligible,
}

impl Report {
    fn from_table(table: &str) -> Option<Report> {
        Some(match table {
            "draws" => Report::Draws,
            "suites" => Report::Suites,
            "students" => Report::Students,
            "groups" => Report::Groups,
            "lottery" => Report::Lottery,
            "capacity" => Report::Capacity,
            "oversubscription" => Report::Oversubscription,
            "next_eligible" => Report::NextEligible,
            _ => return None,
        })
    }

    /// Reports that only make sense for one draw.
    pub fn needs_draw(self) -> bool {
        matches!(
            self,
            Report::Lottery | Report::Capacity | Report::Oversubscription | Report::NextEligible
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Report::Draws => "draws",
            Report::Suites => "suites",
            Report::Students => "students",
            Report::Groups => "groups",
            Report::Lottery => "lottery",
            Report::Capacity => "capacity",
            Report::Oversubscription => "oversubscription",
            Report::NextEligible => "next_eligible",
        }
    }
}

/// Parse exactly one statement, as the extended protocol sends them.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported(
            "more than one statement in a prepared query".into(),
        ));
    }
    Ok(commands.remove(0))
}

/// Parse a `;`-separated simple query. Nothing runs unless every statement
/// parses.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressable by column name. Without an explicit column
/// list the table's declared order applies.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, columns: &'a [String], values: &'a [Expr]) -> Self {
        Self {
            table,
            columns,
            values,
        }
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string(self.required(column)?)
    }

    fn size(&self, column: &'static str) -> Result<Size, SqlError> {
        parse_u32(self.required(column)?)
    }

    fn bool_or(&self, column: &str, default: bool) -> Result<bool, SqlError> {
        self.get(column).map_or(Ok(default), parse_bool)
    }
}

/// Declared column order per writable table.
fn table_columns(table: &str) -> Option<(&'static str, &'static [&'static str])> {
    Some(match table {
        "draws" => ("draws", &["id", "name", "intent_locked", "allow_clipping"]),
        "suites" => ("suites", &["id", "label", "size", "medical"]),
        "draw_suites" => ("draw_suites", &["draw_id", "suite_id"]),
        "students" => ("students", &["id", "name", "surname"]),
        "draw_students" => ("draw_students", &["draw_id", "student_id"]),
        "groups" => ("groups", &["id", "draw_id", "leader_id", "size"]),
        "memberships" => ("memberships", &["group_id", "student_id", "status"]),
        "clips" => ("clips", &["id", "draw_id", "group_id"]),
        "restricted_sizes" => ("restricted_sizes", &["draw_id", "size"]),
        "lottery" => ("lottery", &["draw_id"]),
        "suite_assignments" => ("suite_assignments", &["group_id", "suite_id", "override"]),
        _ => return None,
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, declared) = table_columns(&table).ok_or(SqlError::UnknownTable(table))?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        declared.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let rows = extract_insert_rows(insert)?;

    if table == "clips" {
        if rows.len() > MAX_CLIP_GROUPS {
            return Err(SqlError::TooManyRows(table, MAX_CLIP_GROUPS));
        }
        let first = Row::new(table, &columns, &rows[0]);
        let (id, draw_id) = (first.ulid("id")?, first.ulid("draw_id")?);
        let mut group_ids = Vec::with_capacity(rows.len());
        for (i, values) in rows.iter().enumerate() {
            let r = Row::new(table, &columns, values);
            if r.ulid("id")? != id || r.ulid("draw_id")? != draw_id {
                return Err(SqlError::Parse(format!(
                    "row {i}: every row of a clip needs the same id and draw_id"
                )));
            }
            group_ids.push(r.ulid("group_id")?);
        }
        return Ok(Command::InsertClip {
            id,
            draw_id,
            group_ids,
        });
    }

    if rows.len() > 1 {
        return Err(SqlError::TooManyRows(table, 1));
    }
    let r = Row::new(table, &columns, &rows[0]);
    let cmd = match table {
        "draws" => Command::InsertDraw {
            id: r.ulid("id")?,
            name: r.string("name")?,
            intent_locked: r.bool_or("intent_locked", false)?,
            allow_clipping: r.bool_or("allow_clipping", true)?,
        },
        "suites" => Command::InsertSuite {
            id: r.ulid("id")?,
            label: r.string("label")?,
            size: r.size("size")?,
            medical: r.bool_or("medical", false)?,
        },
        "draw_suites" => Command::AttachSuite {
            draw_id: r.ulid("draw_id")?,
            suite_id: r.ulid("suite_id")?,
        },
        "students" => Command::InsertStudent {
            id: r.ulid("id")?,
            name: r.string("name")?,
            surname: r.string("surname")?,
        },
        "draw_students" => Command::EnrollStudent {
            draw_id: r.ulid("draw_id")?,
            student_id: r.ulid("student_id")?,
        },
        "groups" => Command::InsertGroup {
            id: r.ulid("id")?,
            draw_id: parse_ulid_or_null(r.required("draw_id")?)?,
            leader_id: r.ulid("leader_id")?,
            size: r.size("size")?,
        },
        "memberships" => Command::InsertMembership {
            group_id: r.ulid("group_id")?,
            student_id: r.ulid("student_id")?,
            status: parse_enum(r.required("status")?)?,
        },
        "restricted_sizes" => Command::RestrictSize {
            draw_id: r.ulid("draw_id")?,
            size: r.size("size")?,
        },
        "lottery" => Command::RunLottery {
            draw_id: r.ulid("draw_id")?,
        },
        "suite_assignments" => Command::AssignSuite {
            group_id: r.ulid("group_id")?,
            suite_id: r.ulid("suite_id")?,
            admin_override: r.bool_or("override", false)?,
        },
        _ => return Err(SqlError::UnknownTable(table.to_string())),
    };
    Ok(cmd)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let mut set = BTreeMap::new();
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.insert(column, &a.value);
    }
    let filters = Filters::from_selection(selection)?;
    let only = |column: &str| set.len() == 1 && set.contains_key(column);

    match table.as_str() {
        "draws" => {
            let id = filters.ulid("id")?;
            if only("phase") {
                Ok(Command::AdvanceDraw {
                    id,
                    phase: parse_enum(set["phase"])?,
                })
            } else if only("active") {
                if parse_bool(set["active"])? {
                    return Err(SqlError::Unsupported("archived draws stay archived".into()));
                }
                Ok(Command::ArchiveDraw { id })
            } else if !set.is_empty()
                && set
                    .keys()
                    .all(|k| k == "intent_deadline" || k == "locking_deadline")
            {
                let deadline = |k: &str| set.get(k).map(|e| parse_i64_or_null(e)).transpose();
                Ok(Command::SetDeadlines {
                    id,
                    intent_deadline: deadline("intent_deadline")?,
                    locking_deadline: deadline("locking_deadline")?,
                })
            } else {
                Err(SqlError::Unsupported(format!(
                    "UPDATE draws SET {}",
                    set.keys().cloned().collect::<Vec<_>>().join(", ")
                )))
            }
        }
        "students" if only("intent") => Ok(Command::SetIntent {
            student_id: filters.ulid("id")?,
            intent: parse_enum(set["intent"])?,
        }),
        "groups" if only("status") => {
            let status = parse_string(set["status"])?.to_lowercase();
            match status.as_str() {
                "locked" => match filters.get("id") {
                    Some(id) => Ok(Command::LockGroup {
                        id: parse_ulid(id)?,
                    }),
                    None => Ok(Command::LockFullGroups {
                        draw_id: filters.ulid("draw_id")?,
                        size: filters.get("size").map(parse_u32).transpose()?,
                    }),
                },
                "finalizing" => Ok(Command::BeginFinalizing {
                    id: filters.ulid("id")?,
                }),
                other => Err(SqlError::Unsupported(format!("group status {other}"))),
            }
        }
        "memberships" if only("status") => {
            let status: MembershipStatus = parse_enum(set["status"])?;
            if status != MembershipStatus::Accepted {
                return Err(SqlError::Unsupported(format!(
                    "membership status {}",
                    status.as_str()
                )));
            }
            Ok(Command::AcceptMembership {
                group_id: filters.ulid("group_id")?,
                student_id: filters.ulid("student_id")?,
            })
        }
        "memberships" if only("room_confirmed") => {
            if !parse_bool(set["room_confirmed"])? {
                return Err(SqlError::Unsupported("room confirmations are final".into()));
            }
            Ok(Command::ConfirmRoom {
                group_id: filters.ulid("group_id")?,
                student_id: filters.ulid("student_id")?,
            })
        }
        "clip_memberships" if only("confirmed") => {
            if !parse_bool(set["confirmed"])? {
                return Err(SqlError::Unsupported(
                    "decline by deleting the clip membership".into(),
                ));
            }
            Ok(Command::ConfirmClip {
                clip_id: filters.ulid("clip_id")?,
                group_id: filters.ulid("group_id")?,
            })
        }
        "college" => {
            let (mut direction, mut clip_bias, mut tie_break) = (None, None, None);
            for (column, value) in &set {
                match column.as_str() {
                    "direction" => direction = Some(parse_enum(value)?),
                    "clip_bias" => clip_bias = Some(parse_enum(value)?),
                    "tie_break" => tie_break = Some(parse_enum(value)?),
                    other => return Err(SqlError::Unsupported(format!("college setting {other}"))),
                }
            }
            Ok(Command::ConfigureSort {
                direction,
                clip_bias,
                tie_break,
            })
        }
        "students" | "groups" | "memberships" | "clip_memberships" => Err(SqlError::Unsupported(
            format!("UPDATE {table} SET {}", set.keys().cloned().collect::<Vec<_>>().join(", ")),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "groups" => Ok(Command::DisbandGroup {
            id: filters.ulid("id")?,
        }),
        "draw_suites" => Ok(Command::DetachSuite {
            draw_id: filters.ulid("draw_id")?,
            suite_id: filters.ulid("suite_id")?,
        }),
        "memberships" => Ok(Command::DeleteMembership {
            group_id: filters.ulid("group_id")?,
            student_id: filters.ulid("student_id")?,
        }),
        "clip_memberships" => Ok(Command::LeaveClip {
            clip_id: filters.ulid("clip_id")?,
            group_id: filters.ulid("group_id")?,
        }),
        "restricted_sizes" => Ok(Command::UnrestrictSize {
            draw_id: filters.ulid("draw_id")?,
            size: parse_u32(filters.required("size")?)?,
        }),
        "suite_assignments" => Ok(Command::UnassignSuite {
            group_id: filters.ulid("group_id")?,
        }),
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
    let report = Report::from_table(&table).ok_or(SqlError::UnknownTable(table))?;

    let filters = Filters::from_selection(select.selection.as_ref())?;
    let draw_id = filters.get("draw_id").map(parse_ulid).transpose()?;
    if report.needs_draw() && draw_id.is_none() {
        return Err(SqlError::MissingFilter("draw_id"));
    }
    Ok(Command::Select { report, draw_id })
}

/// The report a SELECT reads from, without looking at its filters. Used to
/// describe prepared statements whose `$n` parameters are still unbound.
pub fn select_report(sql: &str) -> Option<Report> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let table = table_factor_name(&select.from.first()?.relation).ok()?;
    Report::from_table(&table)
}

/// `col = value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: BTreeMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = BTreeMap::new();
        if let Some(expr) = selection {
            collect_equalities(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.terms.get(column).copied()
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?)
    }
}

fn collect_equalities<'a>(
    expr: &'a Expr,
    terms: &mut BTreeMap<String, &'a Expr>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, terms)?;
            collect_equalities(right, terms)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            terms.insert(column, right.as_ref());
            Ok(())
        }
        Expr::Nested(inner) => collect_equalities(inner, terms),
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match source.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Any model enum with a snake_case `FromStr`.
fn parse_enum<T: FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
    TooManyRows(&'static str, usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::TooManyRows(t, max) => write!(f, "{t}: at most {max} rows per INSERT"),
        }
    }
}

impl std::error::Error for SqlError {}
