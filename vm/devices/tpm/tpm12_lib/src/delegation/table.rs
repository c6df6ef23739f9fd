// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The delegate table: owner delegations held inside the TPM.

use super::DelegatePublic;
use crate::arena::Handle;
use crate::arena::SlotArena;
use crate::error::TpmError;
use crate::secret::Secret;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::TABLE_FORMAT_VERSION;
use tpm12_protocol::tpm12proto::StructureTag;

/// `TPM_DELEGATE_TABLE_ROW`
#[derive(Debug, PartialEq, Eq)]
pub struct DelegateTableRow {
    /// Public half of the delegation.
    pub public: DelegatePublic,
    /// Secret a session proves to use the row.
    pub auth_value: Secret,
}

impl DelegateTableRow {
    fn store_with_valid(&self, buf: &mut StoreBuffer, valid: bool) {
        buf.append_u16(StructureTag::DelegateTableRow.into());
        buf.append(&self.public);
        buf.append(&self.auth_value);
        buf.append_bool(valid);
    }

    fn load_with_valid(cursor: &mut LoadCursor<'_>) -> Result<(Self, bool), TpmError> {
        cursor.check_tag(StructureTag::DelegateTableRow.into())?;
        let row = Self {
            public: cursor.load()?,
            auth_value: cursor.load()?,
        };
        Ok((row, cursor.load_bool()?))
    }

    fn empty() -> Self {
        Self {
            public: DelegatePublic::owner(0, 0),
            auth_value: Secret::zero(),
        }
    }
}

/// Handle to a delegate table row.
pub type DelegateHandle = Handle<DelegateTableRow>;

/// Fixed-capacity, index-addressed table of owner delegations.
#[derive(Debug)]
pub struct DelegateTable {
    rows: SlotArena<DelegateTableRow>,
}

impl DelegateTable {
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

    /// Resolve `index` to a row position, valid or not.
    pub fn slot(&self, index: u32) -> Result<DelegateHandle, TpmError> {
        self.rows.handle(index).ok_or(TpmError::BadIndex(index))
    }

    /// The valid row at `index`.
    pub fn row(&self, index: u32) -> Result<&DelegateTableRow, TpmError> {
        self.rows
            .get(self.slot(index)?)
            .ok_or(TpmError::BadIndex(index))
    }

    /// Mutable access to the valid row at `index`.
    pub fn row_mut(&mut self, index: u32) -> Result<&mut DelegateTableRow, TpmError> {
        let handle = self.slot(index)?;
        self.rows.get_mut(handle).ok_or(TpmError::BadIndex(index))
    }

    /// Overwrite the row at `handle`, valid or not.
    pub fn write(&mut self, handle: DelegateHandle, row: DelegateTableRow) {
        self.rows.insert_at(handle, row);
    }

    /// Valid rows with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &DelegateTableRow)> {
        self.rows.iter().map(|(handle, row)| (handle.index(), row))
    }

    /// Invalidate every row belonging to `family_id`, returning how many
    /// were cleared.
    pub fn invalidate_family(&mut self, family_id: u32) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.public.family_id != family_id);
        before - self.rows.len()
    }

    /// Invalidate every row.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Append the persisted form: version, row count, then every row with
    /// its valid flag.
    pub fn store_persisted(&self, buf: &mut StoreBuffer) {
        buf.append_u16(TABLE_FORMAT_VERSION);
        buf.append_u32(self.rows.capacity() as u32);
        let empty = DelegateTableRow::empty();
        for slot in self.rows.slots() {
            slot.unwrap_or(&empty).store_with_valid(buf, slot.is_some());
        }
    }

    /// Decode the persisted form into a table of `capacity` rows.
    pub fn load_persisted(cursor: &mut LoadCursor<'_>, capacity: usize) -> Result<Self, TpmError> {
        let version = cursor.load_u16()?;
        if version != TABLE_FORMAT_VERSION {
            return Err(TpmError::InvalidStructure(
                "unsupported delegate table version",
            ));
        }
        let count = cursor.load_u32()? as usize;
        if count > capacity {
            return Err(TpmError::Resources("delegate table"));
        }
        let mut table = Self::new(capacity);
        for index in 0..count {
            let (row, valid) = DelegateTableRow::load_with_valid(cursor)?;
            if valid {
                let handle = table.slot(index as u32)?;
                table.write(handle, row);
            }
        }
        Ok(table)
    }
}
