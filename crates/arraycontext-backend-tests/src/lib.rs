pub mod conformance;

pub use anyhow;
pub use arraycontext;

/// Installs a test logger; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;

            macro_rules! conformance_test {
                ($name:ident) => {
                    #[test]
                    fn $name() -> $crate::anyhow::Result<()> {
                        $crate::init_logging();
                        let ctx = $crate::arraycontext::ArrayContext::new(($backend_ctor)());
                        $crate::conformance::$name(&ctx)
                    }
                };
            }

            conformance_test!(host_round_trip_through_containers);
            conformance_test!(elementwise_ops_over_containers);
            conformance_test!(scalars_are_weakly_typed);
            conformance_test!(comparisons_use_logical_dtype);
            conformance_test!(where_selects_elementwise);
            conformance_test!(reductions_fold_across_containers);
            conformance_test!(reduction_without_identity_rejects_empty);
            conformance_test!(vdot_and_norms);
            conformance_test!(array_equal_semantics);
            conformance_test!(reshape_orders);
            conformance_test!(transpose_and_joins);
            conformance_test!(broadcast_and_like);
            conformance_test!(freeze_thaw_round_trip);
            conformance_test!(forked_context_rejects_foreign_leaves);
            conformance_test!(named_functions_resolve);
            conformance_test!(record_containers_through_namespace);
            conformance_test!(axis_tags_survive_freeze);
        }
    };
}
