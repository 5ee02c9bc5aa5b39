//! Identifier → root directory table shared by the console and every
//! request worker.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: String,
    pub root: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no path with id {0}")]
    UnknownRoute(String),
    #[error("You need at least one path to serve")]
    LastRoute,
    #[error("Path \"{}\" does not exist", .0.display())]
    NotADirectory(PathBuf),
}

/// Insertion-ordered routes behind one lock, so a lookup sees an add or a
/// remove either completely or not at all.
#[derive(Debug)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
}

impl RouteTable {
    /// A table always starts with one route, id "1".
    pub fn new(root: impl Into<PathBuf>) -> RouteTable {
        RouteTable {
            routes: RwLock::new(vec![Route {
                id: "1".to_string(),
                root: root.into(),
            }]),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Route>> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Route>> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `root` under the next sequential id and returns that id.
    ///
    /// The id is the entry count plus one; after removals that number can
    /// already be taken, in which case the next free number is used.
    pub fn add(&self, root: impl Into<PathBuf>) -> String {
        let mut routes = self.write();

        let mut n = routes.len() + 1;
        while routes.iter().any(|r| r.id == n.to_string()) {
            n += 1;
        }

        let id = n.to_string();
        routes.push(Route {
            id: id.clone(),
            root: root.into(),
        });
        id
    }

    pub fn remove(&self, id: &str) -> Result<Route, RouteError> {
        let mut routes = self.write();

        let pos = routes
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RouteError::UnknownRoute(id.to_string()))?;

        if routes.len() == 1 {
            return Err(RouteError::LastRoute);
        }

        Ok(routes.remove(pos))
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<Route> {
        self.read().clone()
    }

    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        self.read()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.root.clone())
    }

    pub fn first(&self) -> Option<Route> {
        self.read().first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ids_are_sequential() {
        let table = RouteTable::new("/srv/a");
        assert_eq!(table.add("/srv/b"), "2");
        assert_eq!(table.add("/srv/a"), "3");

        let ids: Vec<String> = table.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(table.resolve("3"), Some(PathBuf::from("/srv/a")));
    }

    #[test]
    fn add_after_remove_does_not_reuse_live_id() {
        let table = RouteTable::new("/srv/a");
        table.add("/srv/b");
        table.remove("1").unwrap();

        let id = table.add("/srv/c");
        assert_eq!(id, "3");
        assert_eq!(table.resolve("2"), Some(PathBuf::from("/srv/b")));
        assert_eq!(table.resolve("3"), Some(PathBuf::from("/srv/c")));
    }

    #[test]
    fn refuses_to_remove_last_route() {
        let table = RouteTable::new("/srv/a");
        assert_eq!(table.remove("1"), Err(RouteError::LastRoute));
        assert_eq!(table.resolve("1"), Some(PathBuf::from("/srv/a")));
    }

    #[test]
    fn remove_unknown_is_an_error() {
        let table = RouteTable::new("/srv/a");
        table.add("/srv/b");
        assert_eq!(
            table.remove("9"),
            Err(RouteError::UnknownRoute("9".to_string()))
        );
        assert_eq!(table.list().len(), 2);
    }

    #[test]
    fn list_is_a_snapshot() {
        let table = RouteTable::new("/srv/a");
        let before = table.list();
        table.add("/srv/b");
        assert_eq!(before.len(), 1);
        assert_eq!(table.first().map(|r| r.id), Some("1".to_string()));
    }

    #[test]
    fn concurrent_churn_never_empties_table() {
        let table = Arc::new(RouteTable::new("/srv/base"));

        let writer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..500 {
                    let a = table.add(format!("/srv/{i}/a"));
                    let b = table.add(format!("/srv/{i}/b"));
                    table.remove(&a).unwrap();
                    table.remove(&b).unwrap();
                    assert_eq!(table.remove("1"), Err(RouteError::LastRoute));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let routes = table.list();
                        assert!(!routes.is_empty());
                        for r in &routes {
                            assert!(r.root.starts_with("/srv"));
                        }
                        if let Some(root) = table.resolve("1") {
                            assert_eq!(root, PathBuf::from("/srv/base"));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert!(!table.list().is_empty());
    }
}
