//! `SyncGroupStore` (§4.7): which devices a user wants treated as mirrors
//! of each other, stored as canonicalized, de-duplicated pairs -- no
//! transitive closure (§9's "ambiguous/open" design note, resolved in
//! DESIGN.md to preserve the pairwise contract as specified).
//!
//! Grounded on `device_registry`'s name-to-row resolution and on
//! `subscription_engine`'s "insert-if-absent" shape for the pair rows.

use crate::errors::*;
use crate::model;
use crate::model::insertable;
use crate::schema::{device, sync_group};
use crate::time_helpers;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;

/// `{synchronize: [[devA, devB], ...], "stop-synchronize": [devC, ...]}`.
pub struct Updater {
    pub user_id:     i64,
    pub synchronize: Vec<(String, String)>,
    pub stop_sync:   Vec<String>,
}

impl Updater {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<()> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, _log: &Logger, conn: &mut PgConnection) -> Result<()> {
        for (a, b) in &self.synchronize {
            let device_a = find_device(conn, self.user_id, a)?;
            let device_b = find_device(conn, self.user_id, b)?;
            let (lo, hi) = if device_a.id < device_b.id {
                (device_a.id, device_b.id)
            } else {
                (device_b.id, device_a.id)
            };

            let exists: bool = diesel::select(diesel::dsl::exists(
                sync_group::table
                    .filter(sync_group::user_id.eq(self.user_id))
                    .filter(sync_group::device_a_id.eq(lo))
                    .filter(sync_group::device_b_id.eq(hi)),
            ))
            .get_result(conn)
            .chain_err(|| "error checking sync group existence")?;

            if !exists {
                diesel::insert_into(sync_group::table)
                    .values(&insertable::SyncGroup {
                        user_id:     self.user_id,
                        device_a_id: lo,
                        device_b_id: hi,
                    })
                    .execute(conn)
                    .chain_err(|| "error inserting sync group pair")?;
            }
        }

        for name in &self.stop_sync {
            let device = find_device(conn, self.user_id, name)?;
            diesel::delete(
                sync_group::table
                    .filter(sync_group::user_id.eq(self.user_id))
                    .filter(
                        sync_group::device_a_id
                            .eq(device.id)
                            .or(sync_group::device_b_id.eq(device.id)),
                    ),
            )
            .execute(conn)
            .chain_err(|| "error removing sync group pairs")?;
        }

        Ok(())
    }
}

fn find_device(conn: &mut PgConnection, user_id: i64, name: &str) -> Result<model::Device> {
    device::table
        .filter(device::user_id.eq(user_id))
        .filter(device::name.eq(name))
        .first(conn)
        .optional()
        .chain_err(|| "error looking up device")?
        .ok_or_else(|| Error::from(error::not_found("device", name.to_owned())))
}

/// `{synchronized: [[name, name], ...], "not-synchronized": [name, ...]}`.
pub struct Membership {
    pub synchronized:     Vec<(String, String)>,
    pub not_synchronized: Vec<String>,
}

pub fn read(conn: &mut PgConnection, user_id: i64) -> Result<Membership> {
    let devices: Vec<model::Device> = device::table
        .filter(device::user_id.eq(user_id))
        .filter(device::active.eq(true))
        .load(conn)
        .chain_err(|| "error loading devices")?;

    let names_by_id: std::collections::HashMap<i64, String> =
        devices.iter().map(|d| (d.id, d.name.clone())).collect();

    let pairs: Vec<(i64, i64)> = sync_group::table
        .filter(sync_group::user_id.eq(user_id))
        .select((sync_group::device_a_id, sync_group::device_b_id))
        .load(conn)
        .chain_err(|| "error loading sync group pairs")?;

    let mut paired_ids = std::collections::HashSet::new();
    let mut synchronized = Vec::new();
    for (a, b) in pairs {
        if let (Some(name_a), Some(name_b)) = (names_by_id.get(&a), names_by_id.get(&b)) {
            synchronized.push((name_a.clone(), name_b.clone()));
            paired_ids.insert(a);
            paired_ids.insert(b);
        }
    }

    let not_synchronized = devices
        .iter()
        .filter(|d| !paired_ids.contains(&d.id))
        .map(|d| d.name.clone())
        .collect();

    Ok(Membership {
        synchronized,
        not_synchronized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_synchronize_and_membership() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let phone = test_data::device::insert(log, conn, user.user_id);
        let laptop = test_data::device::insert(log, conn, user.user_id);
        let tablet = test_data::device::insert(log, conn, user.user_id);

        Updater {
            user_id:     user.user_id,
            synchronize: vec![(phone.name.clone(), laptop.name.clone())],
            stop_sync:   vec![],
        }
        .run(log, conn)
        .unwrap();

        let membership = read(conn, user.user_id).unwrap();
        assert_eq!(1, membership.synchronized.len());
        assert!(membership.not_synchronized.contains(&tablet.name));
    }

    #[test]
    fn test_no_transitive_closure() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let a = test_data::device::insert(log, conn, user.user_id);
        let b = test_data::device::insert(log, conn, user.user_id);
        let c = test_data::device::insert(log, conn, user.user_id);

        Updater {
            user_id:     user.user_id,
            synchronize: vec![(a.name.clone(), b.name.clone()), (b.name.clone(), c.name.clone())],
            stop_sync:   vec![],
        }
        .run(log, conn)
        .unwrap();

        let membership = read(conn, user.user_id).unwrap();
        // Two pairs, not one equivalence class of three -- the engine never
        // materializes the transitive closure.
        assert_eq!(2, membership.synchronized.len());
        assert!(membership.not_synchronized.is_empty());
    }

    #[test]
    fn test_stop_synchronize_removes_all_pairs_for_device() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let a = test_data::device::insert(log, conn, user.user_id);
        let b = test_data::device::insert(log, conn, user.user_id);

        Updater {
            user_id:     user.user_id,
            synchronize: vec![(a.name.clone(), b.name.clone())],
            stop_sync:   vec![],
        }
        .run(log, conn)
        .unwrap();

        Updater {
            user_id:     user.user_id,
            synchronize: vec![],
            stop_sync:   vec![a.name.clone()],
        }
        .run(log, conn)
        .unwrap();

        let membership = read(conn, user.user_id).unwrap();
        assert!(membership.synchronized.is_empty());
    }
}
