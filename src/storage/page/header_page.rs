use crate::common::{PageId, PAGE_SIZE};

const NUM_RECORDS_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Maximum length of an index name stored in the header page
pub const MAX_INDEX_NAME_LEN: usize = 32;

const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable byte view over the header page (page 0).
///
/// The header page is a directory of (index_name, root_page_id) records,
/// updated whenever an index is created or its root page changes.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn num_records(&self) -> u32 {
        HeaderPageRef::new(self.data).num_records()
    }

    fn set_num_records(&mut self, num: u32) {
        self.data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4].copy_from_slice(&num.to_le_bytes());
    }

    /// Inserts a (name, root_page_id) record. Returns false if the name is
    /// already present, the page is full, or the name is too long.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > MAX_INDEX_NAME_LEN {
            return false;
        }
        let num = self.num_records() as usize;
        if num >= MAX_RECORDS {
            return false;
        }
        if HeaderPageRef::new(self.data).find_record(name).is_some() {
            return false;
        }

        let offset = RECORDS_OFFSET + num * RECORD_SIZE;
        self.data[offset..offset + MAX_INDEX_NAME_LEN].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());

        self.set_num_records(num as u32 + 1);
        true
    }

    /// Updates the root page id of an existing record. Returns false if the
    /// name is not present.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match HeaderPageRef::new(self.data).find_record(name) {
            Some(slot) => {
                let offset = RECORDS_OFFSET + slot * RECORD_SIZE + MAX_INDEX_NAME_LEN;
                self.data[offset..offset + 4]
                    .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Removes a record, compacting the tail. Returns false if absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let num = self.num_records() as usize;
        match HeaderPageRef::new(self.data).find_record(name) {
            Some(slot) => {
                let start = RECORDS_OFFSET + slot * RECORD_SIZE;
                let end = RECORDS_OFFSET + num * RECORD_SIZE;
                self.data.copy_within(start + RECORD_SIZE..end, start);
                self.set_num_records(num as u32 - 1);
                true
            }
            None => false,
        }
    }
}

/// Read-only byte view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn num_records(&self) -> u32 {
        let bytes: [u8; 4] = self.data[NUM_RECORDS_OFFSET..NUM_RECORDS_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes)
    }

    /// Looks up the root page id recorded for an index name.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|slot| {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE + MAX_INDEX_NAME_LEN;
            let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
            PageId::new(u32::from_le_bytes(bytes))
        })
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        let num = self.num_records() as usize;
        for slot in 0..num {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
            let stored = &self.data[offset..offset + MAX_INDEX_NAME_LEN];
            let len = stored.iter().position(|&b| b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
            if &stored[..len] == name.as_bytes() {
                return Some(slot);
            }
        }
        None
    }
}
