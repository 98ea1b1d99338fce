use nr_bytes::ByteBuffer;

#[test]
fn test_append_and_len() {
    let mut buf = ByteBuffer::new();
    assert!(buf.is_empty());
    buf.append_slice(&[1, 2, 3]).unwrap();
    buf.append_byte(4).unwrap();
    assert_eq!(buf.len(), 4);
    assert_eq!(buf.to_vec(), vec![1, 2, 3, 4]);
}

#[test]
fn test_prepend_uses_headroom() {
    let mut buf = ByteBuffer::from_slice(&[10, 11, 12]).unwrap();
    buf.prepend_slice(&[1, 2]).unwrap();
    assert_eq!(buf.to_vec(), vec![1, 2, 10, 11, 12]);
    // A second prepend still fits in the remaining headroom.
    buf.prepend_slice(&[0]).unwrap();
    assert_eq!(buf.to_vec(), vec![0, 1, 2, 10, 11, 12]);
}

#[test]
fn test_prepend_without_headroom() {
    let mut buf = ByteBuffer::from_vec(vec![5, 6]);
    buf.prepend_slice(&[1, 2, 3]).unwrap();
    assert_eq!(buf.to_vec(), vec![1, 2, 3, 5, 6]);
}

#[test]
fn test_trim_head_and_tail() {
    let mut buf = ByteBuffer::from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
    buf.trim_head(2);
    assert_eq!(buf.to_vec(), vec![3, 4, 5, 6]);
    buf.trim_tail(3);
    assert_eq!(buf.to_vec(), vec![3]);
    buf.trim_tail(5);
    assert!(buf.is_empty());
}

#[test]
fn test_trim_across_segments() {
    let mut buf = ByteBuffer::from_slice(&[1, 2]).unwrap();
    buf.append_buffer(ByteBuffer::from_vec(vec![3, 4]));
    buf.append_buffer(ByteBuffer::from_vec(vec![5, 6]));
    assert!(buf.segments().count() >= 3);
    buf.trim_head(3);
    assert_eq!(buf.to_vec(), vec![4, 5, 6]);
    buf.trim_tail(2);
    assert_eq!(buf.to_vec(), vec![4]);
}

#[test]
fn test_indexing() {
    let mut buf = ByteBuffer::from_slice(&[9, 8]).unwrap();
    buf.append_buffer(ByteBuffer::from_vec(vec![7]));
    assert_eq!(buf[0], 9);
    assert_eq!(buf[2], 7);
    assert_eq!(buf.byte_at(1), 8);
}

#[test]
fn test_deep_copy_is_independent() {
    let mut buf = ByteBuffer::from_slice(&[1, 2, 3]).unwrap();
    let copy = buf.deep_copy().unwrap();
    buf.trim_head(2);
    assert_eq!(copy.to_vec(), vec![1, 2, 3]);
    // The copy has headroom for a header prepend.
    let mut copy = copy;
    copy.prepend_slice(&[0xaa, 0xbb]).unwrap();
    assert_eq!(copy.to_vec(), vec![0xaa, 0xbb, 1, 2, 3]);
}

#[test]
fn test_view() {
    let mut buf = ByteBuffer::from_slice(&[1, 2]).unwrap();
    buf.append_buffer(ByteBuffer::from_vec(vec![3, 4, 5]));
    let view = buf.view(1, 3);
    assert_eq!(view.len(), 3);
    assert_eq!(view.to_vec(), vec![2, 3, 4]);
}

#[test]
fn test_segments_mut_covers_all_bytes() {
    let mut buf = ByteBuffer::from_slice(&[1, 1]).unwrap();
    buf.append_buffer(ByteBuffer::from_vec(vec![1, 1, 1]));
    for seg in buf.segments_mut() {
        for b in seg.iter_mut() {
            *b ^= 0xff;
        }
    }
    assert_eq!(buf.to_vec(), vec![0xfe; 5]);
}

#[test]
fn test_equality() {
    let a = ByteBuffer::from_slice(&[1, 2, 3]).unwrap();
    let mut b = ByteBuffer::from_vec(vec![1]);
    b.append_buffer(ByteBuffer::from_vec(vec![2, 3]));
    assert_eq!(a, b);
    assert_eq!(a, vec![1, 2, 3]);
}
