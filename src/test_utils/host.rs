use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Binding;
use crate::Error;
use crate::HostReloader;
use crate::Result;

/// Host that records every reload request.
#[derive(Debug, Default)]
pub struct RecordingHost {
    reloads: AtomicUsize,
    events: Mutex<Vec<BTreeSet<String>>>,
    fail_reload: AtomicBool,
}

impl RecordingHost {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<BTreeSet<String>> {
        self.events.lock().clone()
    }

    pub fn fail_reloads(
        &self,
        fail: bool,
    ) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }
}

impl HostReloader for RecordingHost {
    fn whole_reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(Error::HostReload("context refresh rejected".into()));
        }
        Ok(())
    }

    fn publish_change_event(
        &self,
        keys: &BTreeSet<String>,
    ) {
        self.events.lock().push(keys.clone());
    }
}

/// An object with one string field bound to configuration.
#[derive(Debug, Default)]
pub struct BoundTarget {
    value: Mutex<String>,
}

impl BoundTarget {
    pub fn binding(
        target: &Arc<Self>,
        template: &str,
    ) -> Binding {
        Binding::new(target, "value", template, |t: &BoundTarget, v: &str| {
            t.set(v.to_string());
            Ok(())
        })
    }

    pub fn value(&self) -> String {
        self.value.lock().clone()
    }

    pub fn set(
        &self,
        value: String,
    ) {
        *self.value.lock() = value;
    }
}

pub fn keys(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|k| k.to_string()).collect()
}
