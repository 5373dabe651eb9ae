use tinykv_bench::db::artifact_path;
use tinykv_bench::{BackendKind, DbHandle};

const KINDS: [BackendKind; 2] = [BackendKind::FsDb, BackendKind::LsmDb];

#[test]
fn store_lives_under_name_dot_db() {
    for kind in KINDS {
        let dir = tempfile::tempdir().unwrap();
        let h = DbHandle::open("fruits", kind, dir.path()).unwrap();
        assert_eq!(h.artifact_path(), artifact_path(dir.path(), "fruits"));
        assert!(h.artifact_path().is_dir(), "{kind}");
        assert_eq!(h.name(), "fruits");
        assert_eq!(h.kind(), kind);
        h.close().unwrap();
    }
}

#[test]
fn writes_are_readable_and_survive_reopen() {
    for kind in KINDS {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut h = DbHandle::open("s", kind, dir.path()).unwrap();
            h.db().put(b"apple", b"100").unwrap();
            h.db().put_sync(b"banana", b"200").unwrap();
            {
                let mut batch = h.db().new_batch();
                batch.set(b"cherry", b"300");
                batch.set(b"banana", b"250");
                batch.write_sync().unwrap();
                batch.close();
            }
            assert_eq!(h.db().get(b"banana").unwrap(), Some(b"250".to_vec()), "{kind}");
            h.close().unwrap();
        }

        let mut h = DbHandle::open("s", kind, dir.path()).unwrap();
        assert_eq!(h.db().get(b"apple").unwrap(), Some(b"100".to_vec()), "{kind}");
        assert_eq!(h.db().get(b"banana").unwrap(), Some(b"250".to_vec()), "{kind}");
        assert_eq!(h.db().get(b"cherry").unwrap(), Some(b"300".to_vec()), "{kind}");
        assert_eq!(h.db().get(b"durian").unwrap(), None, "{kind}");
    }
}

#[test]
fn closed_batch_commits_nothing() {
    for kind in KINDS {
        let dir = tempfile::tempdir().unwrap();
        let mut h = DbHandle::open("s", kind, dir.path()).unwrap();
        {
            let mut batch = h.db().new_batch();
            batch.set(b"k", b"v");
            batch.close();
            assert!(batch.write_sync().is_err(), "{kind}");
        }
        assert_eq!(h.db().get(b"k").unwrap(), None, "{kind}");
    }
}

#[test]
fn stats_are_backend_specific() {
    let dir = tempfile::tempdir().unwrap();

    let mut fs = DbHandle::open("f", BackendKind::FsDb, dir.path()).unwrap();
    fs.db().put(b"k", b"v").unwrap();
    let stats = fs.stats();
    assert_eq!(stats["fsdb.keys"], "1");

    let mut lsm = DbHandle::open("l", BackendKind::LsmDb, dir.path()).unwrap();
    lsm.db().put(b"k", b"v").unwrap();
    let stats = lsm.stats();
    assert_eq!(stats["lsm.memtable.entries"], "1");
    assert_eq!(stats["lsm.tables"], "0");
}

#[test]
fn many_keys_round_trip() {
    for kind in KINDS {
        let dir = tempfile::tempdir().unwrap();
        let mut h = DbHandle::open("many", kind, dir.path()).unwrap();
        for i in 0..300u32 {
            h.db().put(i.to_string().as_bytes(), &i.to_le_bytes()).unwrap();
        }
        h.reopen().unwrap();
        for i in (0..300u32).step_by(7) {
            let got = h.db().get(i.to_string().as_bytes()).unwrap();
            assert_eq!(got, Some(i.to_le_bytes().to_vec()), "{kind}");
        }
    }
}
