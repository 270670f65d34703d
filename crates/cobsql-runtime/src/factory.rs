//! Name-keyed driver factory.
//!
//! The original dynamic-module loader is realised as a static registry:
//! a backend compiled into this build yields a ready (`init()`-ed)
//! driver; anything else logs an ERROR and yields nothing.

use tracing::error;

use crate::iface::DbInterface;
#[cfg(feature = "postgres")]
use crate::pgsql::PgsqlDriver;

pub const DB_PGSQL: i32 = 1;
pub const DB_ODBC: i32 = 2;
pub const DB_MYSQL: i32 = 3;
pub const DB_ORACLE: i32 = 4;
pub const DB_SQLITE: i32 = 5;

pub struct DbInterfaceFactory;

impl DbInterfaceFactory {
    /// Obtain a driver by backend name.
    pub fn get_interface(name: &str) -> Option<Box<dyn DbInterface>> {
        let mut dbi: Box<dyn DbInterface> = match name {
            #[cfg(feature = "postgres")]
            "pgsql" => Box::new(PgsqlDriver::new_live()),
            #[cfg(not(feature = "postgres"))]
            "pgsql" => {
                error!("db provider 'pgsql' is not built into this binary");
                return None;
            }
            "odbc" | "mysql" | "oracle" | "sqlite" => {
                error!("db provider '{name}' is not built into this binary");
                return None;
            }
            _ => {
                error!("unknown db provider '{name}'");
                return None;
            }
        };
        dbi.init();
        Some(dbi)
    }

    /// Obtain a driver by backend id constant.
    pub fn get_interface_by_id(id: i32) -> Option<Box<dyn DbInterface>> {
        let name = match id {
            DB_PGSQL => "pgsql",
            DB_ODBC => "odbc",
            DB_MYSQL => "mysql",
            DB_ORACLE => "oracle",
            DB_SQLITE => "sqlite",
            _ => {
                error!("unknown db provider id {id}");
                return None;
            }
        };
        Self::get_interface(name)
    }

    /// Backends this build can actually produce.
    pub fn available_drivers() -> Vec<&'static str> {
        if cfg!(feature = "postgres") {
            vec!["pgsql"]
        } else {
            Vec::new()
        }
    }

    /// Give the driver back. The instance (and any module resources it
    /// holds) is released on drop; the caller must not use it afterwards.
    pub fn release_interface(dbi: Box<dyn DbInterface>) {
        drop(dbi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_yields_nothing() {
        assert!(DbInterfaceFactory::get_interface("db2z").is_none());
        assert!(DbInterfaceFactory::get_interface_by_id(99).is_none());
    }

    #[test]
    fn uncompiled_backends_yield_nothing() {
        assert!(DbInterfaceFactory::get_interface("odbc").is_none());
        assert!(DbInterfaceFactory::get_interface("mysql").is_none());
        assert!(DbInterfaceFactory::get_interface("oracle").is_none());
        assert!(DbInterfaceFactory::get_interface("sqlite").is_none());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn pgsql_backend_is_available() {
        assert!(DbInterfaceFactory::get_interface("pgsql").is_some());
        assert_eq!(DbInterfaceFactory::available_drivers(), vec!["pgsql"]);
    }
}
