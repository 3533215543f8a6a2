/*!
# vmware-exporter DevKit - Fixtures et harness de test

Bibliothèque facilitant le développement de l'exporter sans vCenter :
- Construction d'inventaires en mémoire ou de fichiers fixture JSON
- Harness qui exécute de vrais cycles de collecte et vérifie les séries
*/

pub mod fixtures;
pub mod test_utils;

pub use fixtures::{reference_inventory, InventoryBuilder, VmBuilder};
pub use test_utils::TestHarness;
