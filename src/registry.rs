//! CPU registry (§4.8/§6.4): maps a CPU name to the back end and variant
//! that implements it, used both for `-C`/`PROCESSOR` selection and for
//! the dispatcher's `.Z80`-style CPU-switch pseudo-op.

use crate::backend::{CpuBackend, CpuVariant};

#[derive(Debug, Clone, Copy)]
pub struct CpuHandle {
    pub backend_index: usize,
    pub variant_index: usize,
}

pub struct CpuRegistry {
    backends: Vec<Box<dyn CpuBackend>>,
}

impl Default for CpuRegistry {
    fn default() -> Self {
        CpuRegistry { backends: Vec::new() }
    }
}

impl CpuRegistry {
    pub fn new() -> Self {
        CpuRegistry::default()
    }

    pub fn register(&mut self, backend: Box<dyn CpuBackend>) {
        self.backends.push(backend);
    }

    pub fn find(&self, name: &str) -> Option<CpuHandle> {
        for (backend_index, backend) in self.backends.iter().enumerate() {
            for variant in backend.variants() {
                if variant.name.eq_ignore_ascii_case(name) {
                    return Some(CpuHandle { backend_index, variant_index: variant.index });
                }
            }
        }
        None
    }

    pub fn backend(&self, index: usize) -> &dyn CpuBackend {
        self.backends[index].as_ref()
    }

    pub fn backend_mut(&mut self, index: usize) -> &mut dyn CpuBackend {
        self.backends[index].as_mut()
    }

    pub fn variant(&self, handle: CpuHandle) -> &CpuVariant {
        self.backends[handle.backend_index]
            .variants()
            .iter()
            .find(|v| v.index == handle.variant_index)
            .expect("registry handle always resolves")
    }

    pub fn init_all_passes(&mut self) {
        for backend in &mut self.backends {
            backend.pass_init();
        }
    }
}
