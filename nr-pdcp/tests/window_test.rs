use nr_pdcp::SnWindow;

#[test]
fn test_add_get_remove() {
    let mut win: SnWindow<u32> = SnWindow::new(16);
    assert!(win.is_empty());
    assert!(!win.has_sn(3));

    *win.add_sn(3, 30) = 31;
    assert!(win.has_sn(3));
    assert_eq!(win.get(3), Some(&31));
    assert_eq!(win.len(), 1);

    assert_eq!(win.remove_sn(3), Some(31));
    assert!(!win.has_sn(3));
    assert!(win.is_empty());
}

#[test]
fn test_slot_reuse_one_window_ahead() {
    let mut win: SnWindow<u32> = SnWindow::new(16);
    win.add_sn(2, 20);
    // COUNT 18 maps to the same slot as COUNT 2.
    assert!(!win.has_sn(18));
    assert_eq!(win.slot_count(18), Some(2));

    win.add_sn(18, 180);
    assert!(win.has_sn(18));
    assert!(!win.has_sn(2));
    assert_eq!(win.len(), 1);
}

#[test]
fn test_remove_wrong_count_is_noop() {
    let mut win: SnWindow<u32> = SnWindow::new(8);
    win.add_sn(1, 10);
    assert_eq!(win.remove_sn(9), None);
    assert!(win.has_sn(1));
}

#[test]
fn test_clear() {
    let mut win: SnWindow<u32> = SnWindow::new(8);
    win.add_sn(0, 1);
    win.add_sn(5, 2);
    win.clear();
    assert!(win.is_empty());
    assert!(!win.has_sn(0));
    assert!(!win.has_sn(5));
}

#[test]
fn test_get_mut() {
    let mut win: SnWindow<String> = SnWindow::new(4);
    win.add_sn(2, "a".to_string());
    win.get_mut(2).unwrap().push('b');
    assert_eq!(win.get(2).map(String::as_str), Some("ab"));
    assert_eq!(win.get_mut(6), None);
}
