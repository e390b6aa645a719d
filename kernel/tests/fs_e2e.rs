use kernel::fs::entry::DIR_ENTRY_SIZE;
use kernel::fs::fat::{cluster_values, is_end_of_chain};
use kernel::fs::format::{FormatOptions, format_disk, format_volume};
use kernel::fs::name::lfn_checksum;
use kernel::fs::{FsError, RamDisk, Session, WriteMode};

const DISK_SECTORS: u64 = 16_384;

fn fresh_session() -> Session<RamDisk> {
    let mut disk = RamDisk::new(DISK_SECTORS);
    let opts = FormatOptions {
        sectors_per_cluster: 1,
        ..FormatOptions::default()
    };
    format_disk(&mut disk, DISK_SECTORS, &opts).unwrap();
    Session::open(disk).unwrap()
}

#[test]
fn note_round_trip() {
    let mut session = fresh_session();
    let mut fs = session.fs();

    fs.create_file("", "note.txt").unwrap();
    fs.write_file("", "note.txt", b"hello world", WriteMode::Rewrite)
        .unwrap();

    assert_eq!(fs.read_file("", "note.txt").unwrap(), b"hello world");
    let listing = fs.read_directory("").unwrap();
    let note = listing.iter().find(|e| e.name == "note.txt").unwrap();
    assert_eq!(note.size, 11);
    assert!(!note.is_directory);
}

#[test]
fn directory_lifecycle_restores_free_count() {
    let mut session = fresh_session();
    let free_before = session.volume().free_cluster_count;
    let mut fs = session.fs();

    fs.create_directory("", "docs").unwrap();
    fs.create_file("docs", "a.txt").unwrap();
    fs.write_file("docs", "a.txt", &[b'x'; 2000], WriteMode::Rewrite)
        .unwrap();

    let names: Vec<String> = fs
        .read_directory("docs")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["a.txt"]);

    fs.delete_directory("", "docs").unwrap();
    assert!(!fs.directory_exists("docs").unwrap());
    assert_eq!(fs.free_space().free_clusters, free_before);
    assert_eq!(fs.count_free_clusters().unwrap(), free_before);
}

#[test]
fn long_name_uses_two_fragments_with_matching_checksum() {
    let mut session = fresh_session();
    let root = session.volume().root_dir_cluster;
    let mut fs = session.fs();

    fs.create_file("", "a_very_long_filename.txt").unwrap();
    let found = fs.find_entry(root, "a_very_long_filename.txt").unwrap().unwrap();
    assert_eq!(found.lfn_locations.len(), 2);

    let checksum = lfn_checksum(&found.entry.name);
    let lba = found.location.lba;

    let image = session.disk().as_bytes();
    let sector = &image[lba as usize * 512..(lba as usize + 1) * 512];
    for pos in &found.lfn_locations {
        assert_eq!(pos.lba, lba);
        let slot = &sector[pos.index * DIR_ENTRY_SIZE..(pos.index + 1) * DIR_ENTRY_SIZE];
        assert_eq!(slot[11], 0x0F);
        assert_eq!(slot[13], checksum);
    }

    let names: Vec<String> = session
        .fs()
        .read_directory("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["a_very_long_filename.txt"]);
}

#[test]
fn allocation_extends_chain_by_exact_count() {
    let mut session = fresh_session();
    let mut fs = session.fs();

    let head = fs.allocate(0, 3).unwrap();
    let old_length = fs.chain_length(head).unwrap();
    let free = fs.volume().free_cluster_count;
    let tail = *fs.chain(head).unwrap().last().unwrap();

    fs.allocate(tail, 5).unwrap();
    let chain = fs.chain(head).unwrap();
    assert_eq!(chain.len() as u32, old_length + 5);
    assert!(is_end_of_chain(fs.read_entry(*chain.last().unwrap()).unwrap()));
    assert_eq!(fs.volume().free_cluster_count, free - 5);
}

#[test]
fn removed_entry_is_gone_and_chain_is_free() {
    let mut session = fresh_session();
    let root = session.volume().root_dir_cluster;
    let mut fs = session.fs();

    fs.create_file("/", "data.bin").unwrap();
    fs.write_file("/", "data.bin", &[7u8; 3000], WriteMode::Rewrite)
        .unwrap();
    let head = fs.find_entry(root, "data.bin").unwrap().unwrap().entry.first_cluster;
    let chain = fs.chain(head).unwrap();
    assert_eq!(chain.len(), 6);

    fs.remove(root, "data.bin").unwrap();
    assert!(!fs.exists(root, "data.bin").unwrap());
    for cluster in chain {
        assert_eq!(fs.read_entry(cluster).unwrap(), cluster_values::FREE);
    }
}

#[test]
fn full_directory_rejects_insert_without_changes() {
    let mut session = fresh_session();
    let mut fs = session.fs();
    fs.create_directory("", "small").unwrap();
    let dir = fs.resolve("small").unwrap();

    // 16 slots: `.`, `..` and seven two-slot entries
    for i in 0..7 {
        fs.create_file("small", &format!("f{}", i)).unwrap();
    }
    let before = fs.scan(dir).unwrap();

    assert_eq!(fs.create_file("small", "one_more"), Err(FsError::DirectoryFull));
    assert_eq!(fs.scan(dir).unwrap(), before);
}

#[test]
fn eight_sector_clusters() {
    let mut disk = RamDisk::new(DISK_SECTORS);
    let opts = FormatOptions {
        sectors_per_cluster: 8,
        ..FormatOptions::default()
    };
    format_disk(&mut disk, DISK_SECTORS, &opts).unwrap();
    let mut session = Session::open(disk).unwrap();
    let mut fs = session.fs();
    assert_eq!(fs.free_space().cluster_bytes, 4096);

    fs.create_directory("", "box").unwrap();
    fs.create_file("box", "data.bin").unwrap();
    let first: Vec<u8> = (0..4000).map(|i| (i % 239) as u8).collect();
    let second: Vec<u8> = (0..5000).map(|i| (i % 17) as u8).collect();
    fs.write_file("box", "data.bin", &first, WriteMode::Rewrite).unwrap();
    fs.write_file("box", "data.bin", &second, WriteMode::Append).unwrap();

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(fs.read_file("box", "data.bin").unwrap(), expected);
    let head = fs
        .read_directory("box")
        .unwrap()
        .into_iter()
        .find(|e| e.name == "data.bin")
        .unwrap()
        .first_cluster;
    assert_eq!(fs.chain_length(head).unwrap(), 3);

    // 128 slots: `.`, `..`, data.bin and 62 more two-slot entries
    for i in 0..62 {
        fs.create_file("box", &format!("f{}", i)).unwrap();
    }
    assert_eq!(fs.create_file("box", "extra"), Err(FsError::DirectoryFull));
    assert_eq!(fs.read_directory("box").unwrap().len(), 63);
    assert_eq!(fs.read_file("box", "data.bin").unwrap(), expected);
}

#[test]
fn dot_resolution_is_idempotent() {
    let mut session = fresh_session();
    let mut fs = session.fs();
    fs.create_directory("", "docs").unwrap();
    fs.change_working_directory("docs").unwrap();

    let here = fs.resolve(".").unwrap();
    assert_eq!(fs.resolve("./././.").unwrap(), here);
    let root = fs.volume().root_dir_cluster;
    assert_eq!(fs.resolve("/..").unwrap(), root);
    assert_eq!(fs.resolve("..").unwrap(), root);
}

#[test]
fn append_and_rewrite_through_session() {
    let mut session = fresh_session();
    let mut fs = session.fs();
    fs.create_directory("/", "logs").unwrap();
    fs.create_file("/logs", "boot.log").unwrap();

    let first: Vec<u8> = (0..700).map(|i| (i % 251) as u8).collect();
    let second: Vec<u8> = (0..900).map(|i| (i % 13) as u8).collect();
    fs.write_file("/logs", "boot.log", &first, WriteMode::Append).unwrap();
    fs.write_file("/logs", "boot.log", &second, WriteMode::Append).unwrap();

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(fs.read_file("/logs", "boot.log").unwrap(), expected);

    fs.write_file("/logs", "boot.log", b"reset", WriteMode::Rewrite).unwrap();
    assert_eq!(fs.read_file("logs", "boot.log").unwrap(), b"reset");
}

#[test]
fn state_persists_across_remount() {
    let mut session = fresh_session();
    session.fs().create_directory("", "keep").unwrap();
    session.fs().create_file("keep", "me.txt").unwrap();
    session
        .fs()
        .write_file("keep", "me.txt", b"persisted", WriteMode::Rewrite)
        .unwrap();
    let free = session.volume().free_cluster_count;

    let mut reopened = Session::open(session.into_disk()).unwrap();
    assert_eq!(reopened.volume().free_cluster_count, free);
    assert_eq!(reopened.fs().read_file("/keep", "me.txt").unwrap(), b"persisted");
}

#[test]
fn volume_without_partition_table() {
    let mut disk = RamDisk::new(4096);
    format_volume(&mut disk, 0, 4096, &FormatOptions::default()).unwrap();
    // the boot sector carries 0xAA55 too, but its partition slots are empty
    let copy = RamDisk::from_image(disk.as_bytes().to_vec());
    assert!(matches!(Session::open(copy), Err(FsError::NoPartition)));

    let mut session = Session::from_volume(disk, 0).unwrap();
    session.fs().create_file("", "x").unwrap();
    assert!(session.fs().file_exists("/x").unwrap());
}
