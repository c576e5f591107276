/// Fault decided by an interceptor for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectedFault {
    /// Let the call through.
    #[default]
    None,
    /// Fail the call before it takes effect.
    Before,
    /// Let the call take effect, then report a failure.
    After,
}

impl InjectedFault {
    /// Maps the `Option<bool>` fault notation: `Some(true)` fails before the
    /// effect, `Some(false)` fails after it, `None` passes.
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => InjectedFault::Before,
            Some(false) => InjectedFault::After,
            None => InjectedFault::None,
        }
    }

    pub fn is_fault(&self) -> bool {
        !matches!(self, InjectedFault::None)
    }
}

/// Seam between connections and the store.
///
/// Every connection consults the interceptor of its database when it opens,
/// for each command, and for each commit.
pub trait ConnectionInterceptor: Send + Sync {
    fn on_open(&self) -> InjectedFault {
        InjectedFault::None
    }

    fn on_execute(&self, _command: &str) -> InjectedFault {
        InjectedFault::None
    }

    fn on_commit(&self) -> InjectedFault {
        InjectedFault::None
    }
}
