/// Property document edited by scripts.
///
/// Every mutation goes through `assign`, which records its own inverse. The
/// undo/redo actions call `assign` again, relying on the history to suppress
/// recording while it replays.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use chronicler_history::{History, Record};

#[derive(Clone)]
pub struct Document {
    values: Rc<RefCell<BTreeMap<String, f64>>>,
    history: History,
}

impl Document {
    pub fn new(history: History) -> Self {
        Self {
            values: Rc::new(RefCell::new(BTreeMap::new())),
            history,
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.borrow().get(key).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values.borrow().clone()
    }

    pub fn set(&self, key: &str, value: f64) -> Result<()> {
        self.assign(key, Some(value))
    }

    /// Writes `value` (or removes the key) and records the change.
    pub fn assign(&self, key: &str, value: Option<f64>) -> Result<()> {
        let old = self.write(key, value);
        let record = self.inverse_record(key, old, value).named(format!("set {key}"));
        self.history.record(record)?;
        Ok(())
    }

    /// Applies one step of a continuous drag; a whole drag undoes as one edit.
    pub fn drag(&self, key: &str, value: f64) -> Result<()> {
        let old = self.write(key, Some(value));
        let label = format!("drag {key}");
        let record = self.inverse_record(key, old, Some(value)).named(label.clone());
        self.history.coalesce(&label, record)?;
        Ok(())
    }

    /// Applies several assignments as one undoable edit.
    pub fn batch(&self, name: &str, assignments: &[(String, f64)]) -> Result<()> {
        self.history.group(name, || -> Result<()> {
            for (key, value) in assignments {
                self.set(key, *value)?;
            }
            Ok(())
        })??;
        Ok(())
    }

    fn write(&self, key: &str, value: Option<f64>) -> Option<f64> {
        let mut values = self.values.borrow_mut();
        match value {
            Some(value) => values.insert(key.to_string(), value),
            None => values.remove(key),
        }
    }

    fn inverse_record(&self, key: &str, old: Option<f64>, new: Option<f64>) -> Record {
        let (undo_doc, redo_doc) = (self.clone(), self.clone());
        let (undo_key, redo_key) = (key.to_string(), key.to_string());
        Record::new(
            move || undo_doc.assign(&undo_key, old),
            move || redo_doc.assign(&redo_key, new),
        )
    }
}
