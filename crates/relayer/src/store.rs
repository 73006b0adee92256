//! The canonical Merkle store: the relayer's authoritative off-chain mirror
//! of the on-chain commitment tree. Mutated only by the event watcher
//! (`apply_*_from_event`); every other caller reads a committed snapshot.
use shielded_relayer_core::fe::{FeBe, Fr};
use shielded_relayer_core::zeros::zeros;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{RelayerError, Result};

#[derive(Clone)]
pub struct MerkleStore {
    pool: PgPool,
    tree_id: i32,
    max_roots: u32,
}

impl MerkleStore {
    /// Creates the meta row for `tree_id` if absent, or validates that an
    /// existing tree was initialized with the same `depth`. A depth
    /// mismatch is a startup-fatal configuration error, not a request error.
    pub async fn ensure_initialized(pool: PgPool, tree_id: i32, depth: u8, max_roots: u32) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let existing_depth: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT v FROM merkle_meta WHERE tree_id = $1 AND k = 'depth'")
                .bind(tree_id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing_depth {
            Some(v) => {
                let stored = v.first().copied().unwrap_or(0);
                if stored != depth {
                    return Err(RelayerError::Internal(format!(
                        "tree {tree_id} was initialized with depth {stored}, configured depth is {depth}"
                    )));
                }
            }
            None => {
                let z = zeros(depth)?;
                let root_be = FeBe::from_fr(&z[depth as usize]).0;
                for (k, v) in [
                    ("depth", vec![depth]),
                    ("root", root_be.to_vec()),
                    ("next_index", 0u64.to_be_bytes().to_vec()),
                    ("roots_next_slot", 0u32.to_be_bytes().to_vec()),
                ] {
                    sqlx::query(
                        "INSERT INTO merkle_meta (tree_id, k, v) VALUES ($1, $2, $3)
                         ON CONFLICT (tree_id, k) DO NOTHING",
                    )
                    .bind(tree_id)
                    .bind(k)
                    .bind(v)
                    .execute(&mut *tx)
                    .await?;
                }
                tracing::info!(tree_id, depth, "initialized new Merkle tree");
            }
        }

        tx.commit().await?;
        Ok(Self {
            pool,
            tree_id,
            max_roots,
        })
    }

    pub async fn depth(&self) -> Result<u8> {
        let mut conn = self.pool.acquire().await?;
        self.depth_in(&mut conn).await
    }

    async fn depth_in(&self, conn: &mut sqlx::PgConnection) -> Result<u8> {
        let v: Vec<u8> =
            sqlx::query_scalar("SELECT v FROM merkle_meta WHERE tree_id = $1 AND k = 'depth'")
                .bind(self.tree_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(v[0])
    }

    pub async fn root(&self) -> Result<Fr> {
        Ok(self.root_and_next_index().await?.0)
    }

    pub async fn root_and_next_index(&self) -> Result<(Fr, u64)> {
        let mut conn = self.pool.acquire().await?;
        self.root_and_next_index_in(&mut conn).await
    }

    pub async fn root_and_next_index_in(&self, conn: &mut sqlx::PgConnection) -> Result<(Fr, u64)> {
        read_meta(conn, self.tree_id).await
    }

    /// The last `<= max_roots` committed roots, newest last.
    pub async fn recent_roots(&self) -> Result<Vec<Fr>> {
        let rows: Vec<(i32, Vec<u8>)> =
            sqlx::query_as("SELECT slot_index, fe FROM roots WHERE tree_id = $1 ORDER BY slot_index")
                .bind(self.tree_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(_, fe)| FeBe::from_slice(&fe)?.to_fr().map_err(RelayerError::from))
            .collect()
    }

    pub async fn path_by_index(&self, index: u64) -> Result<(Vec<Fr>, Vec<u8>)> {
        let mut conn = self.pool.acquire().await?;
        self.path_by_index_in(&mut conn, index).await
    }

    pub async fn path_by_index_in(&self, conn: &mut sqlx::PgConnection, index: u64) -> Result<(Vec<Fr>, Vec<u8>)> {
        let depth = self.depth_in(conn).await?;
        let z = zeros(depth)?;
        let mut siblings = Vec::with_capacity(depth as usize);
        let mut bits = Vec::with_capacity(depth as usize);
        for layer in 0..depth {
            let sibling_index = index ^ (1u64 << layer);
            let sibling = get_layer_value(conn, self.tree_id, layer, sibling_index, &z).await?;
            siblings.push(sibling);
            bits.push(((index >> layer) & 1) as u8);
        }
        Ok((siblings, bits))
    }

    pub async fn path_by_commitment(&self, commitment: Fr) -> Result<(Vec<Fr>, Vec<u8>, u64)> {
        let mut conn = self.pool.acquire().await?;
        self.path_by_commitment_in(&mut conn, commitment).await
    }

    pub async fn path_by_commitment_in(
        &self,
        conn: &mut sqlx::PgConnection,
        commitment: Fr,
    ) -> Result<(Vec<Fr>, Vec<u8>, u64)> {
        let fe_hex = FeBe::from_fr(&commitment).to_hex();
        let index: Option<i64> = sqlx::query_scalar(
            "SELECT leaf_index FROM leaves WHERE tree_id = $1 AND fe_hex = $2",
        )
        .bind(self.tree_id)
        .bind(&fe_hex)
        .fetch_optional(&mut *conn)
        .await?;

        let index = index.ok_or(RelayerError::CommitmentNotFound)? as u64;
        let (siblings, bits) = self.path_by_index_in(conn, index).await?;
        Ok((siblings, bits, index))
    }

    /// Opens a `REPEATABLE READ READ ONLY` transaction so a `prepare_*`
    /// handler can take several reads (`root_and_next_index_in`,
    /// `path_by_index_in`, `path_by_commitment_in`) against one consistent
    /// snapshot instead of racing the event watcher's commits. Callers read
    /// through the returned transaction and drop it when done; there's
    /// nothing to commit.
    pub async fn snapshot(&self) -> Result<Transaction<'_, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// The sole writer for deposit events. Atomic per §4.3: locks the meta
    /// row, validates `next_index`/`old_root`, recomputes the path to the
    /// root, and fails closed on any mismatch.
    pub async fn apply_deposit_from_event(
        &self,
        index: u64,
        commitment: Fr,
        old_root: Fr,
        new_root: Fr,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        apply_single_append(&mut tx, self.tree_id, self.max_roots, index, commitment, old_root, new_root)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Applies the two sequential appends a transfer event carries, as one
    /// committed transaction.
    pub async fn apply_transfer_from_event(
        &self,
        start_index: u64,
        out1: Fr,
        out2: Fr,
        old_root: Fr,
        new_root_1: Fr,
        new_root_2: Fr,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        apply_single_append(
            &mut tx,
            self.tree_id,
            self.max_roots,
            start_index,
            out1,
            old_root,
            new_root_1,
        )
        .await?;
        apply_single_append(
            &mut tx,
            self.tree_id,
            self.max_roots,
            start_index + 1,
            out2,
            new_root_1,
            new_root_2,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn read_meta(conn: &mut sqlx::PgConnection, tree_id: i32) -> Result<(Fr, u64)> {
    let root_v: Vec<u8> =
        sqlx::query_scalar("SELECT v FROM merkle_meta WHERE tree_id = $1 AND k = 'root'")
            .bind(tree_id)
            .fetch_one(&mut *conn)
            .await?;
    let next_index_v: Vec<u8> =
        sqlx::query_scalar("SELECT v FROM merkle_meta WHERE tree_id = $1 AND k = 'next_index'")
            .bind(tree_id)
            .fetch_one(&mut *conn)
            .await?;
    let root = FeBe::from_slice(&root_v)?.to_fr()?;
    let mut idx_bytes = [0u8; 8];
    idx_bytes.copy_from_slice(&next_index_v);
    Ok((root, u64::from_be_bytes(idx_bytes)))
}

/// Recomputes the root after appending `leaf` at `index`, given the sibling
/// at every layer on the path from that leaf to the root. Pure and
/// side-effect free, so callers can use it to independently check a claimed
/// new root before trusting it, as well as to actually apply an append.
pub fn recompute_root(index: u64, leaf: Fr, siblings: &[Fr]) -> Result<Fr> {
    let mut current = leaf;
    let mut current_index = index;
    for sibling in siblings {
        let (left, right) = if current_index & 1 == 0 {
            (current, *sibling)
        } else {
            (*sibling, current)
        };
        current = shielded_relayer_core::poseidon::h2(left, right)?;
        current_index >>= 1;
    }
    Ok(current)
}

async fn get_layer_value(
    conn: &mut sqlx::PgConnection,
    tree_id: i32,
    layer: u8,
    index: u64,
    z: &[Fr],
) -> Result<Fr> {
    let fe: Option<Vec<u8>> = if layer == 0 {
        sqlx::query_scalar("SELECT fe FROM leaves WHERE tree_id = $1 AND leaf_index = $2")
            .bind(tree_id)
            .bind(index as i64)
            .fetch_optional(&mut *conn)
            .await?
    } else {
        sqlx::query_scalar(
            "SELECT fe FROM nodes WHERE tree_id = $1 AND node_layer = $2 AND node_index = $3",
        )
        .bind(tree_id)
        .bind(layer as i16)
        .bind(index as i64)
        .fetch_optional(&mut *conn)
        .await?
    };
    match fe {
        Some(bytes) => Ok(FeBe::from_slice(&bytes)?.to_fr()?),
        None => Ok(z[layer as usize]),
    }
}

async fn set_layer_value(
    conn: &mut sqlx::PgConnection,
    tree_id: i32,
    layer: u8,
    index: u64,
    value: Fr,
) -> Result<()> {
    let be = FeBe::from_fr(&value);
    if layer == 0 {
        sqlx::query(
            "INSERT INTO leaves (tree_id, leaf_index, fe, fe_hex) VALUES ($1, $2, $3, $4)
             ON CONFLICT (tree_id, leaf_index) DO UPDATE SET fe = EXCLUDED.fe, fe_hex = EXCLUDED.fe_hex",
        )
        .bind(tree_id)
        .bind(index as i64)
        .bind(be.0.to_vec())
        .bind(be.to_hex())
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO nodes (tree_id, node_layer, node_index, fe, fe_hex) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tree_id, node_layer, node_index) DO UPDATE SET fe = EXCLUDED.fe, fe_hex = EXCLUDED.fe_hex",
        )
        .bind(tree_id)
        .bind(layer as i16)
        .bind(index as i64)
        .bind(be.0.to_vec())
        .bind(be.to_hex())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn apply_single_append(
    tx: &mut Transaction<'_, Postgres>,
    tree_id: i32,
    max_roots: u32,
    index: u64,
    commitment: Fr,
    old_root: Fr,
    new_root: Fr,
) -> Result<()> {
    // Row-level lock: a concurrent writer for the same tree blocks here
    // until this transaction commits or rolls back.
    let meta_rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
        "SELECT k, v FROM merkle_meta WHERE tree_id = $1 FOR UPDATE",
    )
    .bind(tree_id)
    .fetch_all(&mut **tx)
    .await?;

    let depth = meta_rows
        .iter()
        .find(|(k, _)| k == "depth")
        .map(|(_, v)| v[0])
        .ok_or_else(|| RelayerError::Internal(format!("tree {tree_id} has no depth row")))?;
    let current_root_bytes = meta_rows
        .iter()
        .find(|(k, _)| k == "root")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| RelayerError::Internal(format!("tree {tree_id} has no root row")))?;
    let next_index = meta_rows
        .iter()
        .find(|(k, _)| k == "next_index")
        .map(|(_, v)| {
            let mut b = [0u8; 8];
            b.copy_from_slice(v);
            u64::from_be_bytes(b)
        })
        .ok_or_else(|| RelayerError::Internal(format!("tree {tree_id} has no next_index row")))?;
    let roots_next_slot = meta_rows
        .iter()
        .find(|(k, _)| k == "roots_next_slot")
        .map(|(_, v)| {
            let mut b = [0u8; 4];
            b.copy_from_slice(v);
            u32::from_be_bytes(b)
        })
        .unwrap_or(0);

    if 1u64 << depth <= index {
        return Err(RelayerError::InvalidInput(format!(
            "leaf index {index} exceeds tree capacity 2^{depth}"
        )));
    }
    if next_index != index {
        return Err(RelayerError::NextIndexMismatch);
    }
    let current_root = FeBe::from_slice(&current_root_bytes)?.to_fr()?;
    if current_root != old_root {
        return Err(RelayerError::OldRootMismatch);
    }

    let z = zeros(depth)?;
    set_layer_value(tx, tree_id, 0, index, commitment).await?;

    let mut current = commitment;
    let mut current_index = index;
    for layer in 0..depth {
        let sibling_index = current_index ^ (1u64 << layer);
        let sibling = get_layer_value(tx, tree_id, layer, sibling_index, &z).await?;
        let (left, right) = if current_index & (1u64 << layer) == 0 {
            (current, sibling)
        } else {
            (sibling, current)
        };
        current = shielded_relayer_core::poseidon::h2(left, right)?;
        current_index >>= 1;
        set_layer_value(tx, tree_id, layer + 1, current_index, current).await?;
    }

    if current != new_root {
        return Err(RelayerError::RecomputedRootMismatch);
    }

    let new_root_be = FeBe::from_fr(&new_root).0;
    sqlx::query("UPDATE merkle_meta SET v = $2 WHERE tree_id = $1 AND k = 'root'")
        .bind(tree_id)
        .bind(new_root_be.to_vec())
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE merkle_meta SET v = $2 WHERE tree_id = $1 AND k = 'next_index'")
        .bind(tree_id)
        .bind((index + 1).to_be_bytes().to_vec())
        .execute(&mut **tx)
        .await?;

    let new_slot = roots_next_slot % max_roots;
    sqlx::query(
        "INSERT INTO roots (tree_id, slot_index, fe, fe_hex) VALUES ($1, $2, $3, $4)
         ON CONFLICT (tree_id, slot_index) DO UPDATE SET fe = EXCLUDED.fe, fe_hex = EXCLUDED.fe_hex",
    )
    .bind(tree_id)
    .bind(new_slot as i32)
    .bind(new_root_be.to_vec())
    .bind(FeBe(new_root_be).to_hex())
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE merkle_meta SET v = $2 WHERE tree_id = $1 AND k = 'roots_next_slot'")
        .bind(tree_id)
        .bind((roots_next_slot + 1).to_be_bytes().to_vec())
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shielded_relayer_core::poseidon::h2;

    const DEPTH: u8 = 4;

    #[sqlx::test]
    async fn fresh_tree_has_zero_root_and_next_index(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let z = zeros(DEPTH).unwrap();
        let (root, next_index) = store.root_and_next_index().await.unwrap();
        assert_eq!(root, z[DEPTH as usize]);
        assert_eq!(next_index, 0);

        let (siblings, bits) = store.path_by_index(0).await.unwrap();
        assert!(siblings.iter().zip(z.iter()).all(|(s, z)| s == z));
        assert!(bits.iter().all(|&b| b == 0));
    }

    #[sqlx::test]
    async fn deposit_then_lookup_by_commitment_recovers_index(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let z = zeros(DEPTH).unwrap();
        let old_root = z[DEPTH as usize];
        let commitment = Fr::from(42u64);

        let mut expected = z[0];
        let mut node = commitment;
        for layer in 0..DEPTH {
            let sibling = z[layer as usize];
            node = h2(node, sibling).unwrap();
            expected = node;
        }

        store
            .apply_deposit_from_event(0, commitment, old_root, expected)
            .await
            .unwrap();

        let (root, next_index) = store.root_and_next_index().await.unwrap();
        assert_eq!(root, expected);
        assert_eq!(next_index, 1);

        let (_, _, index) = store.path_by_commitment(commitment).await.unwrap();
        assert_eq!(index, 0);
    }

    #[sqlx::test]
    async fn deposit_with_wrong_next_index_is_rejected(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let z = zeros(DEPTH).unwrap();
        let old_root = z[DEPTH as usize];
        let result = store
            .apply_deposit_from_event(1, Fr::from(7u64), old_root, old_root)
            .await;
        assert!(matches!(result, Err(RelayerError::NextIndexMismatch)));
    }

    #[sqlx::test]
    async fn deposit_with_stale_old_root_is_rejected(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let result = store
            .apply_deposit_from_event(0, Fr::from(7u64), Fr::from(999u64), Fr::from(999u64))
            .await;
        assert!(matches!(result, Err(RelayerError::OldRootMismatch)));
    }

    #[sqlx::test]
    async fn recompute_root_matches_a_fresh_append(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let (_, next_index) = store.root_and_next_index().await.unwrap();
        let (siblings, _) = store.path_by_index(next_index).await.unwrap();
        let commitment = Fr::from(42u64);

        let expected = recompute_root(next_index, commitment, &siblings).unwrap();

        let old_root = store.root().await.unwrap();
        store
            .apply_deposit_from_event(next_index, commitment, old_root, expected)
            .await
            .unwrap();

        let (root_after, _) = store.root_and_next_index().await.unwrap();
        assert_eq!(root_after, expected);
    }

    #[sqlx::test]
    async fn snapshot_reads_agree_with_direct_reads(pool: PgPool) {
        let store = MerkleStore::ensure_initialized(pool, 0, DEPTH, 64).await.unwrap();
        let old_root = store.root().await.unwrap();
        let commitment = Fr::from(7u64);
        let (siblings, _) = store.path_by_index(0).await.unwrap();
        let new_root = recompute_root(0, commitment, &siblings).unwrap();
        store
            .apply_deposit_from_event(0, commitment, old_root, new_root)
            .await
            .unwrap();

        let mut tx = store.snapshot().await.unwrap();
        let (snap_root, snap_next_index) = store.root_and_next_index_in(&mut tx).await.unwrap();
        let (direct_root, direct_next_index) = store.root_and_next_index().await.unwrap();
        assert_eq!(snap_root, direct_root);
        assert_eq!(snap_next_index, direct_next_index);
    }
}
