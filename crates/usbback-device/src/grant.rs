use std::collections::HashMap;
use std::sync::Mutex;

/// Maps a request segment's grant reference to backend-accessible bytes.
/// The actual hypercall that turns a grant reference into mapped memory is
/// host infrastructure outside this crate's scope; this trait is the seam
/// a real backend plugs that infrastructure into.
pub trait GrantMapper: Send + Sync {
    fn map(&self, grant_ref: u32) -> Option<Vec<u8>>;
    fn unmap(&self, grant_ref: u32, data: Vec<u8>);
}

/// A deterministic, fully in-memory [`GrantMapper`] for tests: grant refs
/// are just keys into a page table the test populates up front.
#[derive(Default)]
pub struct InMemoryGrantMapper {
    pages: Mutex<HashMap<u32, Vec<u8>>>,
}

impl InMemoryGrantMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, grant_ref: u32, page: Vec<u8>) {
        self.pages.lock().unwrap().insert(grant_ref, page);
    }

    /// Returns whatever bytes were last unmapped for `grant_ref`, letting
    /// a test observe what the backend wrote back.
    pub fn written_back(&self, grant_ref: u32) -> Option<Vec<u8>> {
        self.pages.lock().unwrap().get(&grant_ref).cloned()
    }
}

impl GrantMapper for InMemoryGrantMapper {
    fn map(&self, grant_ref: u32) -> Option<Vec<u8>> {
        self.pages.lock().unwrap().get(&grant_ref).cloned()
    }

    fn unmap(&self, grant_ref: u32, data: Vec<u8>) {
        self.pages.lock().unwrap().insert(grant_ref, data);
    }
}
