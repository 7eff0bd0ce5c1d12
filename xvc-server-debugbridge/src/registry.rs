//! Driver registry (component B).
//!
//! Maps a lowercase driver name to a factory closure. Exactly one entry
//! may be flagged as the process default. Registration is idempotent
//! only when the same name is registered twice with an identical
//! `requires_target` flag (a stand-in for "identity" in a language
//! without runtime class identity); any other collision is a startup
//! bug and aborts via `panic!`, matching spec.md §4.B and §9's "no
//! static-init magic -- call an explicit register-all function" note.
use crate::backends::JtagDriverHandle;
use crate::error::BridgeError;

/// A driver factory: given the leftover CLI args and (if
/// `requires_target`) a target string, constructs a boxed driver.
pub struct DriverFactory {
    pub name: &'static str,
    pub requires_target: bool,
    pub is_default: bool,
    pub usage: fn(),
    pub create: fn(args: &[String], target: Option<&str>) -> Result<JtagDriverHandle, BridgeError>,
}

/// Process-wide name -> factory map, built once by [`Registry::register_all`].
#[derive(Default)]
pub struct Registry {
    drivers: Vec<DriverFactory>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers `factory`. Re-registering the same name with the same
    /// `requires_target` is a no-op; any other collision aborts the
    /// process, since it can only mean two different drivers are
    /// fighting over one name.
    pub fn register(&mut self, factory: DriverFactory) {
        if let Some(existing) = self.drivers.iter().find(|d| d.name == factory.name) {
            if existing.requires_target == factory.requires_target
                && existing.is_default == factory.is_default
            {
                return;
            }
            panic!(
                "driver name collision: '{}' registered twice with conflicting definitions",
                factory.name
            );
        }
        self.drivers.push(factory);
    }

    pub fn get(&self, name: &str) -> Option<&DriverFactory> {
        self.drivers.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn default_driver(&self) -> Option<&DriverFactory> {
        self.drivers.iter().find(|d| d.is_default)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.iter().map(|d| d.name)
    }

    pub fn print_usage(&self) {
        for d in &self.drivers {
            (d.usage)();
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn require_target(target: Option<&str>, driver: &str) -> Result<&str, BridgeError> {
    target.ok_or_else(|| BridgeError::Proto(format!("{driver} requires a target")))
}

/// Registers every concrete driver this bridge ships with. Called once
/// from `main`, per spec.md §9's "no static-init magic" note.
pub fn register_all(registry: &mut Registry) {
    use crate::backends::debug_bridge_ip::DebugBridgeIpDriver;
    use crate::backends::fifo::FifoDriver;
    use crate::backends::serdes::SerDesDriver;
    use crate::backends::tmem::TmemDriver;
    use crate::stream::JtagDriver;

    registry.register(DriverFactory {
        name: "fifo",
        requires_target: true,
        is_default: false,
        usage: FifoDriver::usage,
        create: |args, target| {
            let target = require_target(target, "fifo")?;
            let irq = flag_value(args, "-i");
            Ok(Box::new(JtagDriver::new(FifoDriver::new(target, irq)?)))
        },
    });

    registry.register(DriverFactory {
        name: "debug-bridge-ip",
        requires_target: true,
        is_default: false,
        usage: DebugBridgeIpDriver::usage,
        create: |_args, target| {
            let target = require_target(target, "debug-bridge-ip")?;
            Ok(Box::new(JtagDriver::new(DebugBridgeIpDriver::new(target)?)))
        },
    });

    registry.register(DriverFactory {
        name: "serdes",
        requires_target: true,
        is_default: false,
        usage: SerDesDriver::usage,
        create: |args, target| {
            let target = require_target(target, "serdes")?;
            let bit_bang = has_flag(args, "-b");
            let log_bscan = has_flag(args, "-l");
            Ok(Box::new(JtagDriver::new(SerDesDriver::new(
                target, bit_bang, log_bscan,
            )?)))
        },
    });

    registry.register(DriverFactory {
        name: "tmem",
        requires_target: true,
        is_default: true,
        usage: TmemDriver::usage,
        create: |args, target| {
            let target = require_target(target, "tmem")?;
            let irq = flag_value(args, "-i");
            Ok(Box::new(JtagDriver::new(TmemDriver::new(target, irq)?)))
        },
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backends::fifo::FifoDriver;

    fn dummy_create(
        _args: &[String],
        _target: Option<&str>,
    ) -> Result<JtagDriverHandle, BridgeError> {
        Err(BridgeError::Proto("dummy driver never constructs".into()))
    }

    #[test]
    fn registers_and_looks_up() {
        let mut reg = Registry::new();
        reg.register(DriverFactory {
            name: "fifo",
            requires_target: true,
            is_default: true,
            usage: FifoDriver::usage,
            create: dummy_create,
        });
        assert!(reg.get("fifo").is_some());
        assert!(reg.get("FIFO").is_some());
        assert!(reg.default_driver().is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn identical_reregistration_is_a_no_op() {
        let mut reg = Registry::new();
        let factory = || DriverFactory {
            name: "fifo",
            requires_target: true,
            is_default: true,
            usage: FifoDriver::usage,
            create: dummy_create,
        };
        reg.register(factory());
        reg.register(factory());
        assert_eq!(reg.names().count(), 1);
    }

    #[test]
    #[should_panic(expected = "driver name collision")]
    fn conflicting_reregistration_aborts() {
        let mut reg = Registry::new();
        reg.register(DriverFactory {
            name: "fifo",
            requires_target: true,
            is_default: true,
            usage: FifoDriver::usage,
            create: dummy_create,
        });
        reg.register(DriverFactory {
            name: "fifo",
            requires_target: false,
            is_default: true,
            usage: FifoDriver::usage,
            create: dummy_create,
        });
    }
}
