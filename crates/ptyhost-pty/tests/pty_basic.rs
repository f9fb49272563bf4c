#[test]
fn allocate_and_resize_pty() {
    use ptyhost_pty::pty::{allocate, resize, window_size};
    use ptyhost_pty::TerminalSize;
    use std::os::unix::io::AsRawFd;

    let pair = allocate(TerminalSize::default()).expect("allocate pty");
    resize(
        pair.master.as_raw_fd(),
        TerminalSize::new(30, 100).with_cell_size(10, 20),
    );
    let ws = window_size(&pair.master).expect("read window size");
    assert_eq!((ws.ws_row, ws.ws_col), (30, 100));
    assert_eq!((ws.ws_xpixel, ws.ws_ypixel), (1000, 600));
}
