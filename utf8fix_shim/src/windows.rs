use winapi::um::winuser::{
    MessageBoxW, IDYES, MB_ICONERROR, MB_ICONINFORMATION, MB_SETFOREGROUND, MB_OK, MB_YESNO,
};

pub fn winapi_str<S: AsRef<str>>(input: S) -> Vec<u16> {
    let mut out = input.as_ref().encode_utf16().collect::<Vec<u16>>();
    out.push(0);
    out
}

pub fn message_box(title: &str, text: &str) {
    unsafe {
        MessageBoxW(
            std::ptr::null_mut(),
            winapi_str(text).as_ptr(),
            winapi_str(title).as_ptr(),
            MB_OK | MB_ICONERROR | MB_SETFOREGROUND,
        );
    }
}

pub fn confirm_box(title: &str, text: &str) -> bool {
    let choice = unsafe {
        MessageBoxW(
            std::ptr::null_mut(),
            winapi_str(text).as_ptr(),
            winapi_str(title).as_ptr(),
            MB_YESNO | MB_ICONINFORMATION | MB_SETFOREGROUND,
        )
    };
    choice == IDYES
}
