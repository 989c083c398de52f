use crate::{
    k8s::{
        labels::Map, IntOrString, LabelSelector, ObjectMeta, Objects, PodDisruptionBudget,
        PodDisruptionBudgetSpec,
    },
    Result, StoreContext,
};
use tracing::debug;

/// Workloads with at least this many target instances carry a disruption budget.
pub const MIN_REPLICAS_FOR_BUDGET: u32 = 2;

/// Converges the budget for a workload with `target` instances: it exists iff
/// `target` reaches [`MIN_REPLICAS_FOR_BUDGET`], whatever the previous count.
pub(crate) async fn ensure(
    budgets: &dyn Objects<PodDisruptionBudget>,
    name: &str,
    selector: &Map,
    target: u32,
) -> Result<()> {
    if target >= MIN_REPLICAS_FOR_BUDGET {
        create(budgets, name, selector, target).await
    } else {
        delete(budgets, name).await
    }
}

async fn create(
    budgets: &dyn Objects<PodDisruptionBudget>,
    name: &str,
    selector: &Map,
    target: u32,
) -> Result<()> {
    match budgets.create(&budget(name, selector, target)).await {
        Err(error) if error.is_already_exists() => {
            debug!(%name, "Disruption budget already exists");
            Ok(())
        }
        res => res.map(|_| ()).context("failed to create pod disruption budget"),
    }
}

pub(crate) async fn delete(budgets: &dyn Objects<PodDisruptionBudget>, name: &str) -> Result<()> {
    match budgets.delete(name).await {
        Err(error) if error.is_not_found() => {
            debug!(%name, "Disruption budget already absent");
            Ok(())
        }
        res => res.context("failed to delete pod disruption budget"),
    }
}

fn budget(name: &str, selector: &Map, target: u32) -> PodDisruptionBudget {
    let min_available = i32::try_from(target.saturating_sub(1)).unwrap_or(i32::MAX);
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available)),
            selector: Some(LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
