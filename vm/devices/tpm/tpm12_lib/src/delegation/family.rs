// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The family table.

use crate::arena::Handle;
use crate::arena::SlotArena;
use crate::error::TpmError;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::TABLE_FORMAT_VERSION;
use tpm12_protocol::tpm12proto::FamilyFlags;
use tpm12_protocol::tpm12proto::StructureTag;

/// `TPM_FAMILY_TABLE_ENTRY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyRow {
    /// Caller-chosen label.
    pub label: u8,
    /// Unique family id.
    pub family_id: u32,
    /// Current verification count.
    pub verification_count: u32,
    /// Enabled and admin-lock flags.
    pub flags: FamilyFlags,
}

impl FamilyRow {
    fn store_fields(&self, buf: &mut StoreBuffer) {
        buf.append_u8(self.label);
        buf.append_u32(self.family_id);
        buf.append_u32(self.verification_count);
        buf.append_u32(self.flags.into_bits());
    }

    fn load_fields(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        Ok(Self {
            label: cursor.load_u8()?,
            family_id: cursor.load_u32()?,
            verification_count: cursor.load_u32()?,
            flags: FamilyFlags::from_bits(cursor.load_u32()?),
        })
    }
}

/// The public, tagged form reported by table reads.
impl Store for FamilyRow {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(StructureTag::FamilyTableEntry.into());
        self.store_fields(buf);
    }
}

impl Load for FamilyRow {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::FamilyTableEntry.into())?;
        Self::load_fields(cursor)
    }
}

/// Handle to a family table row.
pub type FamilyHandle = Handle<FamilyRow>;

/// Fixed-capacity table of delegation families.
#[derive(Debug, Clone)]
pub struct FamilyTable {
    rows: SlotArena<FamilyRow>,
}

impl FamilyTable {
    /// An empty table with `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: SlotArena::new(capacity),
        }
    }

    /// Number of rows.
    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    /// Number of valid rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no family exists.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The valid rows in table order.
    pub fn iter(&self) -> impl Iterator<Item = &FamilyRow> {
        self.rows.iter().map(|(_, row)| row)
    }

    fn find(&self, family_id: u32) -> Option<FamilyHandle> {
        self.rows.find(|row| row.family_id == family_id)
    }

    /// The family with id `family_id`.
    pub fn get(&self, family_id: u32) -> Result<&FamilyRow, TpmError> {
        self.find(family_id)
            .and_then(|handle| self.rows.get(handle))
            .ok_or(TpmError::BadIndex(family_id))
    }

    /// Mutable access to the family with id `family_id`.
    pub fn get_mut(&mut self, family_id: u32) -> Result<&mut FamilyRow, TpmError> {
        self.find(family_id)
            .and_then(|handle| self.rows.get_mut(handle))
            .ok_or(TpmError::BadIndex(family_id))
    }

    /// The family with id `family_id`, which must be enabled.
    pub fn get_enabled(&self, family_id: u32) -> Result<&FamilyRow, TpmError> {
        let row = self.get(family_id)?;
        if !row.flags.enabled() {
            return Err(TpmError::DisabledCmd(family_id));
        }
        Ok(row)
    }

    /// Returns true if a row is free.
    pub fn has_room(&self) -> bool {
        self.rows.find_free().is_some()
    }

    /// Add a new family with verification count 1 and clear flags.
    pub fn create(&mut self, label: u8, family_id: u32) -> Result<&FamilyRow, TpmError> {
        let handle = self
            .rows
            .insert(FamilyRow {
                label,
                family_id,
                verification_count: 1,
                flags: FamilyFlags::new(),
            })
            .ok_or(TpmError::Resources("family table"))?;
        self.rows
            .get(handle)
            .ok_or(TpmError::Resources("family table"))
    }

    /// Remove the family with id `family_id`.
    pub fn invalidate(&mut self, family_id: u32) -> Result<FamilyRow, TpmError> {
        self.find(family_id)
            .and_then(|handle| self.rows.free(handle))
            .ok_or(TpmError::BadIndex(family_id))
    }

    /// Remove every family.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Append the persisted form: version, row count, then every row with
    /// its valid flag.
    pub fn store_persisted(&self, buf: &mut StoreBuffer) {
        buf.append_u16(TABLE_FORMAT_VERSION);
        buf.append_u32(self.rows.capacity() as u32);
        let empty = FamilyRow {
            label: 0,
            family_id: 0,
            verification_count: 0,
            flags: FamilyFlags::new(),
        };
        for slot in self.rows.slots() {
            slot.unwrap_or(&empty).store_fields(buf);
            buf.append_bool(slot.is_some());
        }
    }

    /// Decode the persisted form into a table of `capacity` rows.
    pub fn load_persisted(cursor: &mut LoadCursor<'_>, capacity: usize) -> Result<Self, TpmError> {
        let version = cursor.load_u16()?;
        if version != TABLE_FORMAT_VERSION {
            return Err(TpmError::InvalidStructure("unsupported family table version"));
        }
        let count = cursor.load_u32()? as usize;
        if count > capacity {
            return Err(TpmError::Resources("family table"));
        }
        let mut table = Self::new(capacity);
        for index in 0..count {
            let row = FamilyRow::load_fields(cursor)?;
            if !cursor.load_bool()? {
                continue;
            }
            if table.find(row.family_id).is_some() {
                return Err(TpmError::InvalidStructure("duplicate family id"));
            }
            let handle = table
                .rows
                .handle(index as u32)
                .ok_or(TpmError::Resources("family table"))?;
            table.rows.insert_at(handle, row);
        }
        Ok(table)
    }
}
