//! RocksDB-backed persistent economy state.
//!
//! One column family per record kind: allocations, pots, role configs, luck
//! values, claim counts, and metadata (pool, clock, id counters). Every
//! mutation lands as a single atomic [`WriteBatch`] built from a
//! [`ChangeSet`].
//!
//! Key layout:
//! - allocations / pots: big-endian `u64` id
//! - roles: UTF-8 role name
//! - luck / claims: `u32` BE name length, name, `u64` BE epoch
//!
//! Big-endian integers keep iteration in id and epoch order.

use std::collections::BTreeMap;
use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use sluice_core::claims::ClaimLog;
use sluice_core::error::SluiceError;
use sluice_core::pool::UnallocatedPool;
use sluice_core::pot::ClaimPot;
use sluice_core::types::{Epoch, Role};
use sluice_emission::{Allocation, EmissionLedger};
use sluice_luck::{LuckCache, RoleState, RoleThrottleConfig, ThrottleController};

// --- Column family names ---

const CF_ALLOCATIONS: &str = "allocations";
const CF_POTS: &str = "pots";
const CF_ROLES: &str = "roles";
const CF_LUCK: &str = "luck";
const CF_CLAIMS: &str = "claims";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_ALLOCATIONS, CF_POTS, CF_ROLES, CF_LUCK, CF_CLAIMS, CF_METADATA];

// --- Metadata keys ---

const META_POOL: &[u8] = b"pool";
const META_EPOCH: &[u8] = b"epoch";
const META_NEXT_ALLOCATION_ID: &[u8] = b"next_allocation_id";
const META_NEXT_POT_ID: &[u8] = b"next_pot_id";

/// Everything read back from disk on startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub ledger: EmissionLedger,
    pub throttle: ThrottleController,
    pub claims: ClaimLog,
    /// Stored clock value; `None` for a fresh database.
    pub epoch: Option<Epoch>,
}

/// Records written by one committed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub allocations: Vec<Allocation>,
    pub pots: Vec<ClaimPot>,
    pub roles: Vec<(Role, RoleThrottleConfig)>,
    pub luck: Vec<(Role, Epoch, u64)>,
    pub claims: Vec<(Role, Epoch, u64)>,
    pub pool: Option<UnallocatedPool>,
    pub epoch: Option<Epoch>,
    pub next_allocation_id: Option<u64>,
    pub next_pot_id: Option<u64>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
            && self.pots.is_empty()
            && self.roles.is_empty()
            && self.luck.is_empty()
            && self.claims.is_empty()
            && self.pool.is_none()
            && self.epoch.is_none()
            && self.next_allocation_id.is_none()
            && self.next_pot_id.is_none()
    }

    /// Number of rows this change set writes.
    pub fn len(&self) -> usize {
        self.allocations.len()
            + self.pots.len()
            + self.roles.len()
            + self.luck.len()
            + self.claims.len()
            + usize::from(self.pool.is_some())
            + usize::from(self.epoch.is_some())
            + usize::from(self.next_allocation_id.is_some())
            + usize::from(self.next_pot_id.is_some())
    }
}

/// RocksDB-backed persistent economy storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SluiceError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    /// Apply every row of `changes` in one atomic batch.
    pub fn commit(&self, changes: &ChangeSet) -> Result<(), SluiceError> {
        let mut batch = WriteBatch::default();

        let cf = self.cf_handle(CF_ALLOCATIONS)?;
        for allocation in &changes.allocations {
            batch.put_cf(cf, id_key(allocation.id.0), encode(allocation)?);
        }
        let cf = self.cf_handle(CF_POTS)?;
        for pot in &changes.pots {
            batch.put_cf(cf, id_key(pot.id.0), encode(pot)?);
        }
        let cf = self.cf_handle(CF_ROLES)?;
        for (role, config) in &changes.roles {
            batch.put_cf(cf, role.as_str().as_bytes(), encode(config)?);
        }
        let cf = self.cf_handle(CF_LUCK)?;
        for (role, epoch, luck) in &changes.luck {
            batch.put_cf(cf, role_epoch_key(role, *epoch)?, luck.to_le_bytes());
        }
        let cf = self.cf_handle(CF_CLAIMS)?;
        for (role, epoch, count) in &changes.claims {
            batch.put_cf(cf, role_epoch_key(role, *epoch)?, count.to_le_bytes());
        }

        let meta = self.cf_handle(CF_METADATA)?;
        if let Some(pool) = &changes.pool {
            batch.put_cf(meta, META_POOL, encode(pool)?);
        }
        if let Some(epoch) = changes.epoch {
            batch.put_cf(meta, META_EPOCH, epoch.to_le_bytes());
        }
        if let Some(next) = changes.next_allocation_id {
            batch.put_cf(meta, META_NEXT_ALLOCATION_ID, next.to_le_bytes());
        }
        if let Some(next) = changes.next_pot_id {
            batch.put_cf(meta, META_NEXT_POT_ID, next.to_le_bytes());
        }

        self.db.write(batch).map_err(storage_err)
    }

    /// Read back the full economy state.
    pub fn load(&self) -> Result<Snapshot, SluiceError> {
        let allocations = self
            .scan(CF_ALLOCATIONS)?
            .into_iter()
            .map(|(_, v)| decode::<Allocation>(&v))
            .collect::<Result<Vec<_>, _>>()?;
        let pots = self
            .scan(CF_POTS)?
            .into_iter()
            .map(|(_, v)| decode::<ClaimPot>(&v))
            .collect::<Result<Vec<_>, _>>()?;

        let pool = match self.get_meta(META_POOL)? {
            Some(bytes) => decode::<UnallocatedPool>(&bytes)?,
            None => UnallocatedPool::new(),
        };
        let next_allocation_id = self.get_meta_u64(META_NEXT_ALLOCATION_ID)?.unwrap_or(0);
        let next_pot_id = self.get_meta_u64(META_NEXT_POT_ID)?.unwrap_or(0);
        let ledger =
            EmissionLedger::from_parts(pool, allocations, pots, next_allocation_id, next_pot_id);

        let mut luck: BTreeMap<Role, Vec<(Epoch, u64)>> = BTreeMap::new();
        for (key, value) in self.scan(CF_LUCK)? {
            let (role, epoch) = decode_role_epoch_key(&key)?;
            luck.entry(role).or_default().push((epoch, le_u64(&value)?));
        }

        let mut roles = Vec::new();
        for (key, value) in self.scan(CF_ROLES)? {
            let role = Role::new(
                String::from_utf8(key.to_vec()).map_err(|e| SluiceError::Storage(e.to_string()))?,
            );
            let config = decode::<RoleThrottleConfig>(&value)?;
            let cache = rebuild_cache(&role, &config, luck.remove(&role).unwrap_or_default())?;
            roles.push((role, RoleState { config, cache }));
        }
        if let Some(orphan) = luck.keys().next() {
            return Err(SluiceError::Storage(format!("luck stored for unknown role {orphan}")));
        }

        let claims = self
            .scan(CF_CLAIMS)?
            .into_iter()
            .map(|(k, v)| {
                let (role, epoch) = decode_role_epoch_key(&k)?;
                Ok((role, epoch, le_u64(&v)?))
            })
            .collect::<Result<Vec<_>, SluiceError>>()?;

        Ok(Snapshot {
            ledger,
            throttle: ThrottleController::from_roles(roles),
            claims: ClaimLog::from_entries(claims),
            epoch: self.get_meta_u64(META_EPOCH)?,
        })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), SluiceError> {
        self.db.flush().map_err(storage_err)
    }

    /// Sequence number of the last write. Unchanged by reads.
    pub fn sequence(&self) -> u64 {
        self.db.latest_sequence_number()
    }

    // --- Internal helpers ---

    fn scan(&self, name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, SluiceError> {
        let cf = self.cf_handle(name)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| item.map_err(storage_err))
            .collect()
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SluiceError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db.get_cf(cf, key).map_err(storage_err)
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, SluiceError> {
        self.get_meta(key)?.map(|bytes| le_u64(&bytes)).transpose()
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, SluiceError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SluiceError::Storage(format!("missing column family: {name}")))
    }
}

fn storage_err(e: rocksdb::Error) -> SluiceError {
    SluiceError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, SluiceError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| SluiceError::Storage(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, SluiceError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| SluiceError::Storage(e.to_string()))?;
    Ok(value)
}

fn le_u64(bytes: &[u8]) -> Result<u64, SluiceError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SluiceError::Storage("invalid u64 value length".into()))?;
    Ok(u64::from_le_bytes(arr))
}

/// Encode an id as big-endian bytes for ordered iteration.
fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn role_epoch_key(role: &Role, epoch: Epoch) -> Result<Vec<u8>, SluiceError> {
    let name = role.as_str().as_bytes();
    let len = u32::try_from(name.len())
        .map_err(|_| SluiceError::Storage(format!("role name too long: {} bytes", name.len())))?;
    let mut key = Vec::with_capacity(4 + name.len() + 8);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(name);
    key.extend_from_slice(&epoch.to_be_bytes());
    Ok(key)
}

fn decode_role_epoch_key(key: &[u8]) -> Result<(Role, Epoch), SluiceError> {
    let malformed = || SluiceError::Storage("malformed role/epoch key".into());
    let (len, rest) = key.split_first_chunk::<4>().ok_or_else(malformed)?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() != len + 8 {
        return Err(malformed());
    }
    let (name, epoch) = rest.split_at(len);
    let name = String::from_utf8(name.to_vec()).map_err(|_| malformed())?;
    let epoch: [u8; 8] = epoch.try_into().map_err(|_| malformed())?;
    Ok((Role::new(name), Epoch::from_be_bytes(epoch)))
}

/// Rebuild a role's cache, checking the stored epochs are consecutive from
/// its starting epoch.
fn rebuild_cache(
    role: &Role,
    config: &RoleThrottleConfig,
    rows: Vec<(Epoch, u64)>,
) -> Result<LuckCache, SluiceError> {
    let mut values = Vec::with_capacity(rows.len());
    for (i, (epoch, luck)) in rows.into_iter().enumerate() {
        if epoch != config.starting_epoch + i as u64 {
            return Err(SluiceError::Storage(format!(
                "luck cache for {role} has a gap at epoch {epoch}"
            )));
        }
        values.push(luck);
    }
    Ok(LuckCache::from_values(config.starting_epoch, values))
}
