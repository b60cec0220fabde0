use crate::FlacError;

const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC8_TABLE: [u8; 256] = crc8_table();
static CRC16_TABLE: [u16; 256] = crc16_table();

/// CRC-8, polynomial x^8 + x^2 + x + 1, as used by frame headers.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// CRC-16, polynomial x^16 + x^15 + x^2 + 1, covering a whole frame.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize]
    })
}

/// MSB-first bit cursor over a borrowed byte slice.
///
/// Running off the end yields `FlacError::UnexpectedEof`, which the frame
/// decoder turns into "frame incomplete, feed more bytes".
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Whole bytes read so far. Only meaningful when byte aligned.
    pub fn byte_pos(&self) -> usize {
        self.bit_pos / 8
    }

    pub fn align(&mut self) {
        self.bit_pos = (self.bit_pos + 7) & !7;
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u64, FlacError> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(0);
        }
        if self.bit_pos + n as usize > self.data.len() * 8 {
            return Err(FlacError::UnexpectedEof);
        }

        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            let byte = self.data[self.bit_pos / 8];
            let available = 8 - (self.bit_pos % 8) as u32;
            let take = available.min(left);
            let bits = (byte >> (available - take)) & (((1u16 << take) - 1) as u8);
            value = (value << take) | bits as u64;
            left -= take;
            self.bit_pos += take as usize;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool, FlacError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Two's-complement value of `n` bits, sign extended.
    pub fn read_signed(&mut self, n: u32) -> Result<i64, FlacError> {
        if n == 0 {
            return Ok(0);
        }
        let raw = self.read_bits(n)?;
        let shift = 64 - n;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Counts zero bits up to and including the terminating one.
    pub fn read_unary(&mut self) -> Result<u32, FlacError> {
        let mut zeros = 0u32;
        loop {
            if self.bit_pos >= self.data.len() * 8 {
                return Err(FlacError::UnexpectedEof);
            }
            let offset = (self.bit_pos % 8) as u32;
            let rest = self.data[self.bit_pos / 8] << offset;
            if rest == 0 {
                zeros += 8 - offset;
                self.bit_pos += (8 - offset) as usize;
                continue;
            }
            let lead = rest.leading_zeros();
            zeros += lead;
            self.bit_pos += lead as usize + 1;
            return Ok(zeros);
        }
    }

    /// Zig-zag folded Rice code with parameter `param`.
    pub fn read_rice(&mut self, param: u32) -> Result<i64, FlacError> {
        let quotient = self.read_unary()? as u64;
        let folded = (quotient << param) | self.read_bits(param)?;
        Ok((folded >> 1) as i64 ^ -((folded & 1) as i64))
    }

    /// The UTF-8-like variable length integer of frame headers (up to 36 bits).
    pub fn read_coded_number(&mut self) -> Result<u64, FlacError> {
        let first = self.read_bits(8)? as u8;
        let ones = first.leading_ones();
        if ones == 0 {
            return Ok(first as u64);
        }
        if ones == 1 || ones == 8 {
            return Err(FlacError::BadFrame(format!(
                "invalid coded number lead byte {:#04x}",
                first
            )));
        }

        let mut value = (first & (0x7F >> ones)) as u64;
        for _ in 1..ones {
            let next = self.read_bits(8)? as u8;
            if next & 0xC0 != 0x80 {
                return Err(FlacError::BadFrame(format!(
                    "invalid coded number continuation byte {:#04x}",
                    next
                )));
            }
            value = (value << 6) | (next & 0x3F) as u64;
        }
        Ok(value)
    }
}
