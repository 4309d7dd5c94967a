//! The SQL gateway behind the `execute_sql_query` binding.
//!
//! Local datasets are served by registering every registered frame as a
//! view in a fresh in-process SQL context; remote datasets push the query
//! down through the first dataset's connector. The first dataset's source
//! type picks the route for the whole call.

use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use polars::prelude::*;
use polars::sql::SQLContext;
use tracing::debug;

pub fn execute_sql_query(datasets: &[Dataset], sql: &str) -> Result<DataFrame> {
    let first = datasets.first().ok_or(AgentError::NoDatasets)?;
    debug!(route = first.source_type().as_str(), "gateway query");
    if first.source_type().is_local() {
        run_local(datasets, sql)
    } else {
        first
            .execute_sql_query(sql)
            .map_err(|e| AgentError::SqlExecution(e.to_string()))
    }
}

fn run_local(datasets: &[Dataset], sql: &str) -> Result<DataFrame> {
    let mut ctx = SQLContext::new();
    for dataset in datasets {
        let frame = dataset.execute()?;
        ctx.register(dataset.name(), frame.lazy());
    }
    let out = ctx
        .execute(sql)
        .and_then(|lf| lf.collect())
        .map_err(|e| AgentError::SqlExecution(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> Dataset {
        Dataset::from_dataframe(
            "employees",
            df!(
                "name" => &["ada", "alan", "grace"],
                "dept" => &["eng", "eng", "research"],
                "salary" => &[120i64, 90, 150]
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn local_query_over_registered_view() {
        let datasets = vec![employees()];
        let out = execute_sql_query(
            &datasets,
            "SELECT name FROM employees WHERE salary > 100 ORDER BY name",
        )
        .unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn joins_across_registered_views() {
        let depts = Dataset::from_dataframe(
            "depts",
            df!("dept" => &["eng", "research"], "floor" => &[3i64, 5]).unwrap(),
        )
        .unwrap();
        let datasets = vec![employees(), depts];
        let out = execute_sql_query(
            &datasets,
            "SELECT e.name, d.floor FROM employees e JOIN depts d ON e.dept = d.dept",
        )
        .unwrap();
        assert_eq!(out.height(), 3);
    }

    #[test]
    fn bad_sql_is_a_sql_execution_error() {
        let datasets = vec![employees()];
        let err = execute_sql_query(&datasets, "SELECT FROM nothing").unwrap_err();
        assert!(matches!(err, AgentError::SqlExecution(_)));
    }

    #[test]
    fn empty_registry_is_rejected() {
        let err = execute_sql_query(&[], "SELECT 1").unwrap_err();
        assert!(matches!(err, AgentError::NoDatasets));
    }
}
