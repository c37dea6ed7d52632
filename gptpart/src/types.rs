// SPDX-License-Identifier: MIT

//! Well-known GPT partition types.

define_partition_types! {
    Efi => EFI, "EFI System", ["efi"], "c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
    Mbr => MBR, "MBR partition scheme", ["mbr"], "024dee41-33e7-11d3-9d69-0008c781f39f",
    BiosBoot => BIOS_BOOT, "BIOS boot", ["bios"], "21686148-6449-6e6f-744e-656564454649",
    FreeBsdBoot => FREEBSD_BOOT, "FreeBSD boot", ["boot"], "83bd6b9d-7f41-11dc-be0b-001560b84f0f",
    FreeBsd => FREEBSD, "FreeBSD legacy", ["freebsd"], "516e7cb4-6ecf-11d6-8ff8-00022d09712b",
    FreeBsdSwap => FREEBSD_SWAP, "FreeBSD swap", ["freebsd-swap"], "516e7cb5-6ecf-11d6-8ff8-00022d09712b",
    FreeBsdUfs => FREEBSD_UFS, "FreeBSD UFS/UFS2", ["freebsd-ufs"], "516e7cb6-6ecf-11d6-8ff8-00022d09712b",
    FreeBsdVinum => FREEBSD_VINUM, "FreeBSD vinum", ["freebsd-vinum"], "516e7cb8-6ecf-11d6-8ff8-00022d09712b",
    FreeBsdZfs => FREEBSD_ZFS, "FreeBSD ZFS", ["zfs"], "516e7cba-6ecf-11d6-8ff8-00022d09712b",
    DragonFlyLabel32 => DRAGONFLY_LABEL32, "DragonFly disklabel32", ["label32", "dragonfly"], "9d087404-1ca5-11dc-8817-01301bb8a9f5",
    DragonFlyLabel64 => DRAGONFLY_LABEL64, "DragonFly disklabel64", ["label64"], "3d48ce54-1d16-11dc-8696-01301bb8a9f5",
    DragonFlyLegacy => DRAGONFLY_LEGACY, "DragonFly legacy", ["legacy"], "bd215ab2-1d16-11dc-8696-01301bb8a9f5",
    DragonFlySwap => DRAGONFLY_SWAP, "DragonFly swap", ["swap"], "9d58fdbd-1ca5-11dc-8817-01301bb8a9f5",
    DragonFlyUfs1 => DRAGONFLY_UFS1, "DragonFly UFS1", ["ufs"], "9d94ce7c-1ca5-11dc-8817-01301bb8a9f5",
    DragonFlyVinum => DRAGONFLY_VINUM, "DragonFly vinum", ["vinum"], "9dd4478f-1ca5-11dc-8817-01301bb8a9f5",
    DragonFlyCcd => DRAGONFLY_CCD, "DragonFly CCD", ["ccd"], "dbd5211b-1ca5-11dc-8817-01301bb8a9f5",
    DragonFlyHammer => DRAGONFLY_HAMMER, "DragonFly HAMMER", ["hammer"], "61dc63ac-6e38-11dc-8513-01301bb8a9f5",
    DragonFlyHammer2 => DRAGONFLY_HAMMER2, "DragonFly HAMMER2", ["hammer2"], "5cbb9ad1-862d-11dc-a94d-01301bb8a9f5",
    LinuxData => LINUX_DATA, "Linux data", ["linux"], "0fc63daf-8483-4772-8e79-3d69d8477de4",
    LinuxSwap => LINUX_SWAP, "Linux swap", ["linux-swap"], "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f",
    MsBasicData => MS_BASIC_DATA, "Windows", ["windows"], "ebd0a0a2-b9e5-4433-87c0-68b6b72699c7",
    MsReserved => MS_RESERVED, "Windows reserved", ["windows-reserved"], "e3c9e316-0b5c-4db8-817d-f92df00215ae",
    AppleHfs => APPLE_HFS, "Apple HFS", ["hfs"], "48465300-0000-11aa-aa11-00306543ecac",
}
