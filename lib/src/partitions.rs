//! # The fixed partition layout
//!
//! The device carries exactly one GPT layout: a shared ESP, two partition
//! sets `A` and `B` (each an EFI, a root and a var partition) and a shared
//! home partition. Sizes are expressed in MiB and laid out contiguously
//! after a 1 MiB alignment gap; a 1 MiB trailing reserve holds the backup
//! GPT. The table assumes 512-byte logical sectors; for other sector sizes
//! it can be dumped with `sfdisk --dump` and rewritten without moving any
//! partition.

use std::fmt::Display;
use std::fmt::Write as _;

/// Declared size of the target disk.
pub(crate) const DISK_SIZE_MIB: u64 = 61_035;
/// Gap before the first partition.
pub(crate) const LEADING_PAD_MIB: u64 = 1;
/// Reserve after the last partition for the backup GPT.
pub(crate) const TRAILING_PAD_MIB: u64 = 1;
pub(crate) const DEFAULT_SECTOR_SIZE: u64 = 512;

const ESP_SIZE_MIB: u64 = 256;
const EFI_SIZE_MIB: u64 = 64;
const ROOT_SIZE_MIB: u64 = 5120;
const VAR_SIZE_MIB: u64 = 256;
const HOME_SIZE_MIB: u64 = DISK_SIZE_MIB
    - LEADING_PAD_MIB
    - TRAILING_PAD_MIB
    - ESP_SIZE_MIB
    - 2 * (EFI_SIZE_MIB + ROOT_SIZE_MIB + VAR_SIZE_MIB);

const ESP_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
const BASIC_DATA_GUID: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";
const ROOT_X86_64_GUID: &str = "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709";
const VAR_GUID: &str = "4D21B016-B534-45C2-A9FB-5C16E091FD2D";
const HOME_GUID: &str = "933AC7E1-2EB4-4F13-B844-0E14E2AEF915";

/// One of the two redundant partition sets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PartitionSet {
    A,
    B,
}

impl PartitionSet {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PartitionSet::A => "A",
            PartitionSet::B => "B",
        }
    }
}

impl Display for PartitionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a partition is for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Role {
    Esp,
    Efi(PartitionSet),
    Root(PartitionSet),
    Var(PartitionSet),
    Home,
}

impl Role {
    /// The partition's spec from [`PARTITIONS`].
    pub(crate) fn spec(&self) -> &'static PartitionSpec {
        use PartitionSet::*;
        let i = match self {
            Role::Esp => 0,
            Role::Efi(A) => 1,
            Role::Efi(B) => 2,
            Role::Root(A) => 3,
            Role::Root(B) => 4,
            Role::Var(A) => 5,
            Role::Var(B) => 6,
            Role::Home => 7,
        };
        &PARTITIONS[i]
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.spec().name)
    }
}

/// Filesystem type as reported by `blkid`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FsKind {
    Vfat,
    Ext4,
    Btrfs,
}

impl FsKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FsKind::Vfat => "vfat",
            FsKind::Ext4 => "ext4",
            FsKind::Btrfs => "btrfs",
        }
    }
}

impl Display for FsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PartitionSpec {
    /// 1-based partition number.
    pub(crate) index: u32,
    pub(crate) role: Role,
    /// GPT partition name, which is also what verification expects.
    pub(crate) name: &'static str,
    pub(crate) size_mib: u64,
    pub(crate) type_guid: &'static str,
    pub(crate) fs: FsKind,
    /// Filesystem label given when formatting; root filesystems are copied.
    pub(crate) fs_label: Option<&'static str>,
}

const fn part(
    index: u32,
    role: Role,
    name: &'static str,
    size_mib: u64,
    type_guid: &'static str,
    fs: FsKind,
    fs_label: Option<&'static str>,
) -> PartitionSpec {
    PartitionSpec {
        index,
        role,
        name,
        size_mib,
        type_guid,
        fs,
        fs_label,
    }
}

/// The partition table, in on-disk order.
pub(crate) static PARTITIONS: [PartitionSpec; 8] = {
    use FsKind::*;
    use PartitionSet::*;
    [
        part(1, Role::Esp, "esp", ESP_SIZE_MIB, ESP_GUID, Vfat, Some("esp")),
        part(2, Role::Efi(A), "efi-A", EFI_SIZE_MIB, BASIC_DATA_GUID, Vfat, Some("efi")),
        part(3, Role::Efi(B), "efi-B", EFI_SIZE_MIB, BASIC_DATA_GUID, Vfat, Some("efi")),
        part(4, Role::Root(A), "rootfs-A", ROOT_SIZE_MIB, ROOT_X86_64_GUID, Btrfs, None),
        part(5, Role::Root(B), "rootfs-B", ROOT_SIZE_MIB, ROOT_X86_64_GUID, Btrfs, None),
        part(6, Role::Var(A), "var-A", VAR_SIZE_MIB, VAR_GUID, Ext4, Some("var")),
        part(7, Role::Var(B), "var-B", VAR_SIZE_MIB, VAR_GUID, Ext4, Some("var")),
        part(8, Role::Home, "home", HOME_SIZE_MIB, HOME_GUID, Ext4, Some("home")),
    ]
};

/// Render the table as an `sfdisk` script for the given logical sector size.
pub(crate) fn sfdisk_script(sector_size: u64) -> String {
    let per_mib = 1024 * 1024 / sector_size;
    let mut r = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(r, "label: gpt");
    let _ = writeln!(r, "unit: sectors");
    let _ = writeln!(r, "sector-size: {sector_size}");
    let _ = writeln!(r);
    let mut start = LEADING_PAD_MIB * per_mib;
    for p in PARTITIONS.iter() {
        let size = p.size_mib * per_mib;
        let _ = writeln!(
            r,
            "start={start}, size={size}, type={}, name=\"{}\"",
            p.type_guid, p.name
        );
        start += size;
    }
    r
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_layout_fills_disk() {
        let total: u64 = PARTITIONS.iter().map(|p| p.size_mib).sum();
        assert_eq!(total + LEADING_PAD_MIB + TRAILING_PAD_MIB, DISK_SIZE_MIB);
        assert!(HOME_SIZE_MIB > 0);
    }

    #[test]
    fn test_roles_map_to_indices() {
        for (i, p) in PARTITIONS.iter().enumerate() {
            assert_eq!(p.index as usize, i + 1);
            assert_eq!(p.role.spec(), p);
        }
        assert_eq!(Role::Var(PartitionSet::B).spec().name, "var-B");
        assert_eq!(Role::Efi(PartitionSet::A).to_string(), "efi-A");
    }

    #[test]
    fn test_two_partition_sets() {
        for set in [PartitionSet::A, PartitionSet::B] {
            let owned: Vec<_> = PARTITIONS
                .iter()
                .filter(|p| {
                    matches!(p.role, Role::Efi(s) | Role::Root(s) | Role::Var(s) if s == set)
                })
                .map(|p| p.name)
                .collect();
            assert_eq!(owned.len(), 3);
            assert!(owned.iter().all(|n| n.ends_with(set.name())));
        }
    }

    #[test]
    fn test_sfdisk_script() {
        let expected = indoc! { r#"
            label: gpt
            unit: sectors
            sector-size: 512

            start=2048, size=524288, type=C12A7328-F81F-11D2-BA4B-00A0C93EC93B, name="esp"
            start=526336, size=131072, type=EBD0A0A2-B9E5-4433-87C0-68B6B72699C7, name="efi-A"
            start=657408, size=131072, type=EBD0A0A2-B9E5-4433-87C0-68B6B72699C7, name="efi-B"
            start=788480, size=10485760, type=4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709, name="rootfs-A"
            start=11274240, size=10485760, type=4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709, name="rootfs-B"
            start=21760000, size=524288, type=4D21B016-B534-45C2-A9FB-5C16E091FD2D, name="var-A"
            start=22284288, size=524288, type=4D21B016-B534-45C2-A9FB-5C16E091FD2D, name="var-B"
            start=22808576, size=102189056, type=933AC7E1-2EB4-4F13-B844-0E14E2AEF915, name="home"
        "# };
        similar_asserts::assert_eq!(sfdisk_script(DEFAULT_SECTOR_SIZE), expected);
    }

    #[test]
    fn test_sfdisk_script_4k() {
        let s = sfdisk_script(4096);
        assert!(s.contains("sector-size: 4096"));
        assert!(s.contains("start=256, size=65536,"));
    }
}
