// SPDX-License-Identifier: MIT

#[macro_export]
/// Defines the table of well-known GPT partition types.
///
/// This macro generates:
/// - A `uuid::Uuid` constant `GPT_ENT_TYPE_<CONST>` for each type.
/// - An enum `PartitionKind` with one variant per type and an `Unknown` variant.
/// - `PartitionKind::{from_uuid, as_uuid, aliases, from_alias, ALL}`.
/// - A `Display` implementation printing the friendly name.
///
/// # Example
/// ```rust,ignore
/// define_partition_types! {
///     Efi => EFI, "EFI System", ["efi"], "c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
/// }
/// ```
///
/// # Note
/// This macro requires the `paste` crate for identifier concatenation.
macro_rules! define_partition_types {
    (
        $(
            $name:ident => $konst:ident, $desc:expr, [$($alias:expr),* $(,)?], $guid:literal
        ),+ $(,)?
    ) => {
        paste::paste! {
            $(
                #[doc = $desc]
                pub const [<GPT_ENT_TYPE_ $konst>]: uuid::Uuid = uuid::uuid!($guid);
            )+

            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum PartitionKind {
                $($name,)+
                Unknown(uuid::Uuid),
            }

            impl PartitionKind {
                /// Every well-known kind, in declaration order.
                pub const ALL: &'static [PartitionKind] = &[$(Self::$name,)+];

                pub fn from_uuid(guid: &uuid::Uuid) -> Self {
                    match guid {
                        $(g if *g == [<GPT_ENT_TYPE_ $konst>] => Self::$name,)+
                        other => Self::Unknown(*other),
                    }
                }

                pub fn as_uuid(&self) -> uuid::Uuid {
                    match self {
                        $(Self::$name => [<GPT_ENT_TYPE_ $konst>],)+
                        Self::Unknown(guid) => *guid,
                    }
                }

                /// Short names accepted on the command line.
                pub fn aliases(&self) -> &'static [&'static str] {
                    match self {
                        $(Self::$name => &[$($alias),*],)+
                        Self::Unknown(_) => &[],
                    }
                }

                pub fn from_alias(alias: &str) -> Option<Self> {
                    Self::ALL
                        .iter()
                        .copied()
                        .find(|k| k.aliases().iter().any(|a| a.eq_ignore_ascii_case(alias)))
                }

                pub fn is_known(&self) -> bool {
                    !matches!(self, Self::Unknown(_))
                }
            }

            impl core::fmt::Display for PartitionKind {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $(Self::$name => f.write_str($desc),)+
                        Self::Unknown(guid) => write!(f, "{}", guid),
                    }
                }
            }
        }
    };
}
