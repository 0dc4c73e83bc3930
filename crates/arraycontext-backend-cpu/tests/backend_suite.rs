use arraycontext_backend_cpu::CpuBackend;
use arraycontext_backend_tests::define_backend_tests;

define_backend_tests!(cpu_conformance, CpuBackend::new);
