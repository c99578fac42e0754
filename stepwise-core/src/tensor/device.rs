/// Kind of execution backend a tensor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Where a tensor lives.
///
/// Memory is always host resident; the descriptor selects backend specific
/// state layouts and is preserved through [super::Tensor::to_device].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator with the given ordinal.
    Gpu(usize),
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Cpu => DeviceKind::Cpu,
            Self::Gpu(_) => DeviceKind::Gpu,
        }
    }

    /// Parses the form written by [Display](std::fmt::Display): `cpu` or `gpu:N`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(Self::Cpu),
            _ => s
                .strip_prefix("gpu:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(Self::Gpu),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu(ordinal) => write!(f, "gpu:{ordinal}"),
        }
    }
}
