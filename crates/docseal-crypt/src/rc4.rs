use std::fmt;

use zeroize::Zeroize;

/// Minimal RC4 (KSA + PRGA) used by the Binary RC4 and CryptoAPI RC4 variants.
///
/// The permutation is wiped on drop.
pub(crate) struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub(crate) fn new(key: &[u8]) -> Self {
        assert!(!key.is_empty(), "RC4 key must be non-empty");
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256usize {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Rc4 { s, i: 0, j: 0 }
    }

    pub(crate) fn apply_keystream(&mut self, data: &mut [u8]) {
        for b in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
            *b ^= self.s[idx as usize];
        }
    }
}

impl Drop for Rc4 {
    fn drop(&mut self) {
        self.s.zeroize();
        self.i = 0;
        self.j = 0;
    }
}

impl fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Rc4;

    #[test]
    fn rc4_known_vector() {
        // Classic RC4 vector: key="Key", plaintext="Plaintext".
        let mut data = *b"Plaintext";
        Rc4::new(b"Key").apply_keystream(&mut data);
        assert_eq!(data, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
    }

    #[test]
    fn keystream_is_continuous_across_calls() {
        let mut whole = [0u8; 32];
        Rc4::new(b"Secret").apply_keystream(&mut whole);

        let mut split = [0u8; 32];
        let mut rc4 = Rc4::new(b"Secret");
        rc4.apply_keystream(&mut split[..7]);
        rc4.apply_keystream(&mut split[7..]);
        assert_eq!(whole, split);
    }
}
