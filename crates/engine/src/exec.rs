//! Sandboxed plan execution.
//!
//! The interpreter works purely on in-memory tables; it cannot perform
//! IO of any kind. It runs on a dedicated worker thread joined with a
//! wall-clock timeout, and every materialized intermediate table is
//! charged against a cell budget. A worker that outlives the timeout is
//! abandoned; it holds no locks and touches nothing shared.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::{values, Table};

use crate::plan::{AggFunc, Expr, JoinKind, OutputSpec, Predicate, Step, TransformPlan};

#[derive(Debug, Clone)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub max_cells: u64,
}

impl Default for ExecLimits {
    fn default() -> ExecLimits {
        ExecLimits {
            timeout: Duration::from_secs(30),
            max_cells: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecFailure {
    pub kind: ExecFailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailureKind {
    UnknownTable,
    UnknownColumn,
    Budget,
    Timeout,
    Plan,
}

impl std::fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.table, &self.column) {
            (Some(t), Some(c)) => write!(f, "{} (table `{}`, column `{}`)", self.message, t, c),
            (Some(t), None) => write!(f, "{} (table `{}`)", self.message, t),
            _ => f.write_str(&self.message),
        }
    }
}

impl ExecFailure {
    fn unknown_table(name: &str) -> ExecFailure {
        ExecFailure {
            kind: ExecFailureKind::UnknownTable,
            message: format!("table `{}` is not available", name),
            table: Some(name.to_string()),
            column: None,
        }
    }

    fn unknown_column(table: &str, column: &str) -> ExecFailure {
        ExecFailure {
            kind: ExecFailureKind::UnknownColumn,
            message: format!("table `{}` has no column `{}`", table, column),
            table: Some(table.to_string()),
            column: Some(column.to_string()),
        }
    }

    fn plan(table: &str, message: impl Into<String>) -> ExecFailure {
        ExecFailure {
            kind: ExecFailureKind::Plan,
            message: message.into(),
            table: Some(table.to_string()),
            column: None,
        }
    }
}

/// Run a validated plan against its input tables inside the sandbox.
pub fn execute(
    plan: &TransformPlan,
    inputs: &BTreeMap<String, Table>,
    limits: &ExecLimits,
) -> Result<BTreeMap<String, Table>, ExecFailure> {
    let plan = plan.clone();
    let inputs = inputs.clone();
    let max_cells = limits.max_cells;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = run_plan(&plan, inputs, max_cells);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(limits.timeout) {
        Ok(result) => result,
        Err(_) => Err(ExecFailure {
            kind: ExecFailureKind::Timeout,
            message: format!(
                "plan execution exceeded the {}s wall-clock budget",
                limits.timeout.as_secs()
            ),
            table: None,
            column: None,
        }),
    }
}

struct Budget {
    used: u64,
    max: u64,
}

impl Budget {
    fn charge(&mut self, table: &Table) -> Result<(), ExecFailure> {
        self.used = self.used.saturating_add(table.cell_count());
        if self.used > self.max {
            return Err(ExecFailure {
                kind: ExecFailureKind::Budget,
                message: format!(
                    "materialized {} cells, budget is {}",
                    self.used, self.max
                ),
                table: Some(table.name.clone()),
                column: None,
            });
        }
        Ok(())
    }
}

fn run_plan(
    plan: &TransformPlan,
    inputs: BTreeMap<String, Table>,
    max_cells: u64,
) -> Result<BTreeMap<String, Table>, ExecFailure> {
    let mut budget = Budget {
        used: 0,
        max: max_cells,
    };
    let mut env = inputs;
    let mut outputs = BTreeMap::new();

    for spec in &plan.outputs {
        let table = build_output(spec, &env, &mut budget)?;
        env.insert(spec.name.clone(), table.clone());
        outputs.insert(spec.name.clone(), table);
    }
    Ok(outputs)
}

fn build_output(
    spec: &OutputSpec,
    env: &BTreeMap<String, Table>,
    budget: &mut Budget,
) -> Result<Table, ExecFailure> {
    let mut current = env
        .get(&spec.from)
        .ok_or_else(|| ExecFailure::unknown_table(&spec.from))?
        .clone();
    current.name = spec.name.clone();
    budget.charge(&current)?;

    for step in &spec.steps {
        current = apply_step(step, current, env)?;
        budget.charge(&current)?;
    }
    Ok(current)
}

fn apply_step(
    step: &Step,
    mut table: Table,
    env: &BTreeMap<String, Table>,
) -> Result<Table, ExecFailure> {
    match step {
        Step::Select { columns } => {
            let idx = column_indices(&table, columns)?;
            let mut out = Table::new(table.name.clone(), columns.clone());
            for row in &table.rows {
                out.rows.push(idx.iter().map(|&i| row[i].clone()).collect());
            }
            Ok(out)
        }
        Step::Drop { columns } => {
            column_indices(&table, columns)?;
            let keep: Vec<usize> = (0..table.columns.len())
                .filter(|&i| !columns.contains(&table.columns[i]))
                .collect();
            let mut out = Table::new(
                table.name.clone(),
                keep.iter().map(|&i| table.columns[i].clone()).collect(),
            );
            for row in &table.rows {
                out.rows.push(keep.iter().map(|&i| row[i].clone()).collect());
            }
            Ok(out)
        }
        Step::Rename { from, to } => {
            let i = column_index(&table, from)?;
            if table.columns.iter().any(|c| c == to) {
                return Err(ExecFailure::plan(
                    &table.name,
                    format!("rename target `{}` already exists", to),
                ));
            }
            table.columns[i] = to.clone();
            Ok(table)
        }
        Step::Trim { columns } => {
            for i in column_indices(&table, columns)? {
                for row in &mut table.rows {
                    row[i] = row[i].trim().to_string();
                }
            }
            Ok(table)
        }
        Step::Uppercase { columns } => {
            for i in column_indices(&table, columns)? {
                for row in &mut table.rows {
                    row[i] = row[i].to_uppercase();
                }
            }
            Ok(table)
        }
        Step::MapValues { column, mapping } => {
            let i = column_index(&table, column)?;
            for row in &mut table.rows {
                if let Some(mapped) = mapping.get(&row[i]) {
                    row[i] = mapped.clone();
                }
            }
            Ok(table)
        }
        Step::ParseDate { column } => {
            let i = column_index(&table, column)?;
            for row in &mut table.rows {
                row[i] = values::parse_date(&row[i]).unwrap_or_default();
            }
            Ok(table)
        }
        Step::FilterDateParses { column } => {
            let i = column_index(&table, column)?;
            table.rows.retain(|row| values::parse_date(&row[i]).is_some());
            Ok(table)
        }
        Step::ParseNumber { column } => {
            let i = column_index(&table, column)?;
            for row in &mut table.rows {
                row[i] = values::parse_number(&row[i])
                    .map(fmt_number)
                    .unwrap_or_default();
            }
            Ok(table)
        }
        Step::Filter { column, predicate } => {
            let i = column_index(&table, column)?;
            table.rows.retain(|row| eval_predicate(predicate, &row[i]));
            Ok(table)
        }
        Step::Dedup { subset } => {
            let key_idx = if subset.is_empty() {
                (0..table.columns.len()).collect()
            } else {
                column_indices(&table, subset)?
            };
            let mut seen = std::collections::BTreeSet::new();
            let mut out_rows = Vec::with_capacity(table.rows.len());
            for row in table.rows {
                let key: Vec<String> = key_idx.iter().map(|&i| row[i].clone()).collect();
                if seen.insert(key) {
                    out_rows.push(row);
                }
            }
            table.rows = out_rows;
            Ok(table)
        }
        Step::Derive { column, expr } => {
            let mut referenced = Vec::new();
            expr.columns(&mut referenced);
            column_indices(&table, &referenced)?;
            if table.columns.iter().any(|c| c == column) {
                return Err(ExecFailure::plan(
                    &table.name,
                    format!("derived column `{}` already exists", column),
                ));
            }
            let mut rows = std::mem::take(&mut table.rows);
            for row in &mut rows {
                let value = eval_expr(expr, &table, row);
                row.push(value.map(fmt_number).unwrap_or_default());
            }
            table.rows = rows;
            table.columns.push(column.clone());
            Ok(table)
        }
        Step::Join {
            right,
            kind,
            left_on,
            right_on,
        } => {
            let right_table = env
                .get(right)
                .ok_or_else(|| ExecFailure::unknown_table(right))?;
            join(&table, right_table, *kind, left_on, right_on)
        }
        Step::Aggregate {
            group_by,
            aggregates,
        } => aggregate(&table, group_by, aggregates),
    }
}

fn join(
    left: &Table,
    right: &Table,
    kind: JoinKind,
    left_on: &str,
    right_on: &str,
) -> Result<Table, ExecFailure> {
    let li = column_index(left, left_on)?;
    let ri = column_index(right, right_on)?;

    // Right columns minus the join key; collisions get a table prefix.
    let carried: Vec<usize> = (0..right.columns.len()).filter(|&i| i != ri).collect();
    let mut columns = left.columns.clone();
    for &i in &carried {
        let name = &right.columns[i];
        if columns.contains(name) {
            columns.push(format!("{}_{}", right.name, name));
        } else {
            columns.push(name.clone());
        }
    }

    let mut by_key: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, row) in right.rows.iter().enumerate() {
        if !values::is_null(&row[ri]) {
            by_key.entry(row[ri].as_str()).or_default().push(idx);
        }
    }

    let mut out = Table::new(left.name.clone(), columns);
    for row in &left.rows {
        match by_key.get(row[li].as_str()) {
            Some(matches) => {
                for &m in matches {
                    let mut cells = row.clone();
                    for &i in &carried {
                        cells.push(right.rows[m][i].clone());
                    }
                    out.rows.push(cells);
                }
            }
            None => {
                if kind == JoinKind::Left {
                    let mut cells = row.clone();
                    cells.extend(carried.iter().map(|_| String::new()));
                    out.rows.push(cells);
                }
            }
        }
    }
    Ok(out)
}

fn aggregate(
    table: &Table,
    group_by: &[String],
    aggregates: &[crate::plan::Aggregate],
) -> Result<Table, ExecFailure> {
    let group_idx = column_indices(table, group_by)?;
    let mut agg_idx = Vec::with_capacity(aggregates.len());
    for agg in aggregates {
        match &agg.column {
            Some(c) => agg_idx.push(Some(column_index(table, c)?)),
            None => agg_idx.push(None),
        }
    }

    let mut groups: BTreeMap<Vec<String>, Vec<&Vec<String>>> = BTreeMap::new();
    for row in &table.rows {
        let key: Vec<String> = group_idx.iter().map(|&i| row[i].clone()).collect();
        groups.entry(key).or_default().push(row);
    }

    let mut columns = group_by.to_vec();
    columns.extend(aggregates.iter().map(|a| a.name.clone()));
    let mut out = Table::new(table.name.clone(), columns);

    for (key, rows) in groups {
        let mut cells = key;
        for (agg, idx) in aggregates.iter().zip(&agg_idx) {
            cells.push(compute_aggregate(agg.func, *idx, &rows));
        }
        out.rows.push(cells);
    }
    Ok(out)
}

fn compute_aggregate(func: AggFunc, idx: Option<usize>, rows: &[&Vec<String>]) -> String {
    match func {
        AggFunc::Count => fmt_number(rows.len() as f64),
        AggFunc::CountDistinct => {
            let i = match idx {
                Some(i) => i,
                None => return String::new(),
            };
            let distinct: std::collections::BTreeSet<&str> = rows
                .iter()
                .map(|r| r[i].as_str())
                .filter(|v| !values::is_null(v))
                .collect();
            fmt_number(distinct.len() as f64)
        }
        AggFunc::Sum | AggFunc::Min | AggFunc::Max | AggFunc::Mean => {
            let i = match idx {
                Some(i) => i,
                None => return String::new(),
            };
            let nums: Vec<f64> = rows
                .iter()
                .filter_map(|r| values::parse_number(&r[i]))
                .collect();
            if nums.is_empty() {
                return String::new();
            }
            let value = match func {
                AggFunc::Sum => nums.iter().sum(),
                AggFunc::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                AggFunc::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                AggFunc::Mean => nums.iter().sum::<f64>() / nums.len() as f64,
                _ => unreachable!(),
            };
            fmt_number(value)
        }
    }
}

fn eval_predicate(predicate: &Predicate, value: &str) -> bool {
    match predicate {
        Predicate::NotNull => !values::is_null(value),
        Predicate::Eq { value: v } => value.trim() == v,
        Predicate::Ne { value: v } => value.trim() != v,
        Predicate::Gt { value: v } => values::parse_number(value).is_some_and(|n| n > *v),
        Predicate::Ge { value: v } => values::parse_number(value).is_some_and(|n| n >= *v),
        Predicate::Lt { value: v } => values::parse_number(value).is_some_and(|n| n < *v),
        Predicate::Le { value: v } => values::parse_number(value).is_some_and(|n| n <= *v),
    }
}

/// A derived cell is null whenever any operand is non-numeric, or on
/// division by zero.
fn eval_expr(expr: &Expr, table: &Table, row: &[String]) -> Option<f64> {
    match expr {
        Expr::Column { name } => {
            let i = table.columns.iter().position(|c| c == name)?;
            values::parse_number(&row[i])
        }
        Expr::Constant { value } => Some(*value),
        Expr::Add { left, right } => Some(eval_expr(left, table, row)? + eval_expr(right, table, row)?),
        Expr::Sub { left, right } => Some(eval_expr(left, table, row)? - eval_expr(right, table, row)?),
        Expr::Mul { left, right } => Some(eval_expr(left, table, row)? * eval_expr(right, table, row)?),
        Expr::Div { left, right } => {
            let divisor = eval_expr(right, table, row)?;
            if divisor == 0.0 {
                return None;
            }
            Some(eval_expr(left, table, row)? / divisor)
        }
    }
}

/// Integral values print without a fraction so keys and counts stay
/// join-stable as strings.
fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn column_index(table: &Table, column: &str) -> Result<usize, ExecFailure> {
    table
        .column_index(column)
        .ok_or_else(|| ExecFailure::unknown_column(&table.name, column))
}

fn column_indices(table: &Table, columns: &[String]) -> Result<Vec<usize>, ExecFailure> {
    columns.iter().map(|c| column_index(table, c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> Table {
        let mut t = Table::new(
            "customers",
            vec!["customer_id".into(), "region".into(), "spend".into()],
        );
        t.rows.push(vec!["c1".into(), " north ".into(), "10.5".into()]);
        t.rows.push(vec!["c2".into(), "south".into(), "4".into()]);
        t.rows.push(vec!["c2".into(), "south".into(), "4".into()]);
        t
    }

    fn env() -> BTreeMap<String, Table> {
        let mut env = BTreeMap::new();
        env.insert("customers".to_string(), customers());
        env
    }

    fn plan_of(source: &str) -> TransformPlan {
        TransformPlan::parse(source).unwrap()
    }

    fn run(source: &str) -> Result<BTreeMap<String, Table>, ExecFailure> {
        execute(&plan_of(source), &env(), &ExecLimits::default())
    }

    #[test]
    fn trim_dedup_and_derive() {
        let outputs = run(r#"{"inputs": ["customers"], "outputs": [
            {"name": "out", "from": "customers", "steps": [
                {"op": "trim", "columns": ["region"]},
                {"op": "dedup"},
                {"op": "derive", "column": "spend_x2", "expr":
                    {"kind": "mul",
                     "left": {"kind": "column", "name": "spend"},
                     "right": {"kind": "constant", "value": 2}}}
            ]}
        ]}"#)
        .unwrap();
        let out = &outputs["out"];
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0], vec!["c1", "north", "10.5", "21"]);
        assert_eq!(out.rows[1], vec!["c2", "south", "4", "8"]);
    }

    #[test]
    fn unknown_column_is_a_structured_failure() {
        let failure = run(r#"{"inputs": ["customers"], "outputs": [
            {"name": "out", "from": "customers", "steps": [
                {"op": "trim", "columns": ["missing"]}
            ]}
        ]}"#)
        .unwrap_err();
        assert_eq!(failure.kind, ExecFailureKind::UnknownColumn);
        assert_eq!(failure.table.as_deref(), Some("out"));
        assert_eq!(failure.column.as_deref(), Some("missing"));
    }

    #[test]
    fn aggregate_by_region() {
        let outputs = run(r#"{"inputs": ["customers"], "outputs": [
            {"name": "by_region", "from": "customers", "steps": [
                {"op": "trim", "columns": ["region"]},
                {"op": "aggregate", "group_by": ["region"], "aggregates": [
                    {"func": "count", "as": "customers"},
                    {"column": "spend", "func": "sum", "as": "total_spend"},
                    {"column": "customer_id", "func": "count_distinct", "as": "distinct_ids"}
                ]}
            ]}
        ]}"#)
        .unwrap();
        let out = &outputs["by_region"];
        assert_eq!(out.columns, vec!["region", "customers", "total_spend", "distinct_ids"]);
        assert_eq!(out.rows[0], vec!["north", "1", "10.5", "1"]);
        assert_eq!(out.rows[1], vec!["south", "2", "8", "1"]);
    }

    #[test]
    fn left_join_carries_nulls_for_unmatched_rows() {
        let mut env = env();
        let mut regions = Table::new("regions", vec!["region".into(), "zone".into()]);
        regions.rows.push(vec!["south".into(), "Z2".into()]);
        env.insert("regions".to_string(), regions);

        let plan = plan_of(r#"{"inputs": ["customers", "regions"], "outputs": [
            {"name": "out", "from": "customers", "steps": [
                {"op": "trim", "columns": ["region"]},
                {"op": "join", "right": "regions", "kind": "left",
                 "left_on": "region", "right_on": "region"}
            ]}
        ]}"#);
        let outputs = execute(&plan, &env, &ExecLimits::default()).unwrap();
        let out = &outputs["out"];
        assert_eq!(out.columns, vec!["customer_id", "region", "spend", "zone"]);
        assert_eq!(out.rows[0][3], "");
        assert_eq!(out.rows[1][3], "Z2");
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let mut env = env();
        let mut regions = Table::new("regions", vec!["region".into(), "zone".into()]);
        regions.rows.push(vec!["south".into(), "Z2".into()]);
        env.insert("regions".to_string(), regions);

        let plan = plan_of(r#"{"inputs": ["customers", "regions"], "outputs": [
            {"name": "out", "from": "customers", "steps": [
                {"op": "trim", "columns": ["region"]},
                {"op": "join", "right": "regions", "kind": "inner",
                 "left_on": "region", "right_on": "region"}
            ]}
        ]}"#);
        let outputs = execute(&plan, &env, &ExecLimits::default()).unwrap();
        assert_eq!(outputs["out"].rows.len(), 2);
    }

    #[test]
    fn filter_date_parses_drops_bad_rows() {
        let mut env = BTreeMap::new();
        let mut t = Table::new("events", vec!["day".into()]);
        t.rows.push(vec!["2023-05-09".into()]);
        t.rows.push(vec!["not a date".into()]);
        t.rows.push(vec!["5/9/2023".into()]);
        env.insert("events".to_string(), t);

        let plan = plan_of(r#"{"inputs": ["events"], "outputs": [
            {"name": "out", "from": "events", "steps": [
                {"op": "filter_date_parses", "column": "day"},
                {"op": "parse_date", "column": "day"}
            ]}
        ]}"#);
        let outputs = execute(&plan, &env, &ExecLimits::default()).unwrap();
        let out = &outputs["out"];
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1][0], "2023-05-09");
    }

    #[test]
    fn cell_budget_is_enforced() {
        let limits = ExecLimits {
            timeout: Duration::from_secs(5),
            max_cells: 5,
        };
        let failure = execute(
            &plan_of(r#"{"inputs": ["customers"], "outputs": [
                {"name": "out", "from": "customers", "steps": []}
            ]}"#),
            &env(),
            &limits,
        )
        .unwrap_err();
        assert_eq!(failure.kind, ExecFailureKind::Budget);
    }

    #[test]
    fn division_by_zero_yields_null() {
        let outputs = run(r#"{"inputs": ["customers"], "outputs": [
            {"name": "out", "from": "customers", "steps": [
                {"op": "derive", "column": "bad", "expr":
                    {"kind": "div",
                     "left": {"kind": "column", "name": "spend"},
                     "right": {"kind": "constant", "value": 0}}}
            ]}
        ]}"#)
        .unwrap();
        assert_eq!(outputs["out"].rows[0][3], "");
    }
}
