//! Multi-connection isolation, large scans, and on-disk persistence,
//! against file-backed databases.

use solodb::{Connection, OpenOptions, SqlValue};

fn open_file(path: &std::path::Path) -> Connection {
    solodb::open(path.to_str().unwrap(), OpenOptions::default()).unwrap()
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query(sql).unwrap().rows[0][0].as_i64().unwrap()
}

#[test]
fn test_thousand_row_scan_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_file(&dir.path().join("scan.db"));
    conn.query("CREATE TABLE r (seq INT, label VARCHAR(5))").unwrap();
    let ins = conn.prepare("INSERT INTO r (seq, label) VALUES (?, ?)").unwrap();
    for i in 0..1000 {
        ins.query(&[SqlValue::int(i), SqlValue::text(format!("R{:04}", i))]).unwrap();
    }
    let tt = conn.query("SELECT seq, label FROM r").unwrap();
    assert_eq!(tt.rows.len(), 1000);
    for (i, row) in tt.rows.iter().enumerate() {
        assert_eq!(row[0].as_i64(), Some(i as i64));
        assert_eq!(row[1].as_text(), Some(format!("R{:04}", i).as_str()));
    }
}

#[test]
fn test_uncommitted_writes_invisible_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("iso.db");
    let a = open_file(&path);
    a.query("CREATE TABLE t (n INT)").unwrap();

    a.query("START TRANSACTION").unwrap();
    let ins = a.prepare("INSERT INTO t (n) VALUES (?)").unwrap();
    for i in 0..1000 {
        ins.query(&[SqlValue::int(i)]).unwrap();
    }

    // B starts while A is still in flight and sees none of it.
    let b = open_file(&path);
    b.query("START TRANSACTION").unwrap();
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 0);

    a.query("COMMIT").unwrap();

    // Restarting B picks up the committed rows.
    b.query("ROLLBACK").unwrap();
    b.query("START TRANSACTION").unwrap();
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 1000);
    b.query("COMMIT").unwrap();
}

#[test]
fn test_concurrent_writers_conflict_on_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conflict.db");
    let a = open_file(&path);
    a.query("CREATE TABLE t (id INT, PRIMARY KEY (id))").unwrap();

    let b = open_file(&path);
    a.query("START TRANSACTION").unwrap();
    b.query("START TRANSACTION").unwrap();
    a.query("INSERT INTO t (id) VALUES (42)").unwrap();
    // B collides with A's in-flight insert of the same key.
    let err = b.query("INSERT INTO t (id) VALUES (42)").unwrap_err();
    assert_eq!(err.sqlstate(), "40001");
    // B rolls back and retries after A commits; the key is now taken for
    // real, and still conflicts.
    b.query("ROLLBACK").unwrap();
    a.query("COMMIT").unwrap();
    assert_eq!(
        b.query("INSERT INTO t (id) VALUES (42)").unwrap_err().sqlstate(),
        "40001"
    );
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 1);
}

#[test]
fn test_disjoint_concurrent_writers_both_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disjoint.db");
    let a = open_file(&path);
    a.query("CREATE TABLE t (id INT, PRIMARY KEY (id))").unwrap();
    let b = open_file(&path);
    a.query("START TRANSACTION").unwrap();
    b.query("START TRANSACTION").unwrap();
    a.query("INSERT INTO t (id) VALUES (1)").unwrap();
    b.query("INSERT INTO t (id) VALUES (2)").unwrap();
    // Neither sees the other's in-flight row.
    assert_eq!(count(&a, "SELECT COUNT(*) FROM t"), 1);
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 1);
    a.query("COMMIT").unwrap();
    b.query("COMMIT").unwrap();
    let c = open_file(&path);
    assert_eq!(count(&c, "SELECT COUNT(*) FROM t"), 2);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");
    {
        let conn = open_file(&path);
        conn.query("CREATE TABLE t (a INT, b VARCHAR(10))").unwrap();
        conn.query("INSERT INTO t (a, b) VALUES (1, 'one'), (2, 'two')").unwrap();
    }
    let conn = open_file(&path);
    let tt = conn.query("SELECT a, b FROM t").unwrap();
    assert_eq!(
        tt.rows,
        vec![
            vec![SqlValue::int(1), SqlValue::text("one")],
            vec![SqlValue::int(2), SqlValue::text("two")],
        ]
    );
}

#[test]
fn test_abandoned_connection_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("abandon.db");
    let a = open_file(&path);
    a.query("CREATE TABLE t (n INT)").unwrap();
    {
        let b = open_file(&path);
        b.query("START TRANSACTION").unwrap();
        b.query("INSERT INTO t (n) VALUES (1)").unwrap();
        // b drops here without committing.
    }
    assert_eq!(count(&a, "SELECT COUNT(*) FROM t"), 0);
}

#[test]
fn test_churn_reclaims_pages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("churn.db");
    let conn = open_file(&path);
    conn.query("CREATE TABLE t (n INT, pad VARCHAR(100))").unwrap();
    let ins = conn.prepare("INSERT INTO t (n, pad) VALUES (?, ?)").unwrap();
    let pad = "x".repeat(100);
    for i in 0..500 {
        ins.query(&[SqlValue::int(i), SqlValue::text(pad.clone())]).unwrap();
    }
    let grown = std::fs::metadata(&path).unwrap().len();
    conn.query("DELETE FROM t").unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM t"), 0);
    // Deleting every row truncates the reclaimed pages off the file.
    let shrunk = std::fs::metadata(&path).unwrap().len();
    assert!(
        shrunk < grown / 4,
        "file should shrink after full delete: {} -> {}",
        grown,
        shrunk
    );
    // And the table still works.
    conn.query("INSERT INTO t (n, pad) VALUES (1, 'again')").unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM t"), 1);
}

#[test]
fn test_snapshot_reader_does_not_see_later_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.db");
    let a = open_file(&path);
    a.query("CREATE TABLE t (n INT)").unwrap();
    a.query("INSERT INTO t (n) VALUES (1)").unwrap();
    let b = open_file(&path);
    b.query("START TRANSACTION").unwrap();
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 1);
    // A commits more rows after B's snapshot.
    a.query("INSERT INTO t (n) VALUES (2)").unwrap();
    // B's snapshot identifier predates them.
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 1);
    b.query("COMMIT").unwrap();
    assert_eq!(count(&b, "SELECT COUNT(*) FROM t"), 2);
}
