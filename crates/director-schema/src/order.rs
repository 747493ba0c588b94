use crate::resolve::ServiceSpec;

/// Services in ascending priority; equal priorities keep declaration order.
pub fn execution_order(services: &[ServiceSpec]) -> Vec<&ServiceSpec> {
    let mut ordered: Vec<&ServiceSpec> = services.iter().collect();
    // `sort_by_key` is stable.
    ordered.sort_by_key(|s| s.priority);
    ordered
}

/// The exact reverse of [`execution_order`], used when stopping a project.
pub fn teardown_order(services: &[ServiceSpec]) -> Vec<&ServiceSpec> {
    let mut ordered = execution_order(services);
    ordered.reverse();
    ordered
}
