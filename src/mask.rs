/// Mask/unmask a payload in place: `buf[i] ^= mask[i % 4]`.
///
/// Masking is an involution, so the same call unmasks.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for chunk in &mut words {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        chunk.copy_from_slice(&(u32::from_ne_bytes(word) ^ key).to_ne_bytes());
    }

    // the remainder starts at a multiple of 4, so the key is still aligned
    apply_mask_bytewise(words.into_remainder(), mask);
}

#[inline]
fn apply_mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
