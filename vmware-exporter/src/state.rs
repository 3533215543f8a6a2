/**
 * ÉTAT PARTAGÉ - Petits états mutables partagés entre tâches
 *
 * RÔLE : Alias commun pour ce que le scheduler écrit et que les handlers HTTP
 * lisent (état du tracker de santé). Les verrous ne sont jamais tenus à
 * travers un `.await`.
 */

use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
