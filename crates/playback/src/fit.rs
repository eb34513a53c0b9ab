/// Largest size with the source aspect ratio that fits in `max_w` x `max_h`.
///
/// Sources that already fit are returned unchanged; nothing is ever upscaled.
pub fn fit_size(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if w == 0 || h == 0 || (w <= max_w && h <= max_h) {
        return (w, h);
    }
    let r = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    // Truncate, tolerating float error in `w * (max_w / w)`.
    let fw = ((w as f64 * r + 1e-9) as u32).max(1);
    let fh = ((h as f64 * r + 1e-9) as u32).max(1);
    (fw, fh)
}
