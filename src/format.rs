//! Data-type bitfield and the closed table of rate/format presets.

bitflags::bitflags! {
    /// Payload selector carried in scan requests and data fragments.
    ///
    /// Bit order is the canonical payload order on the wire: a fragment
    /// appends one typed payload per set flag, lowest bit first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataType: u16 {
        /// Per-column brightness ("luminosity") byte.
        const LM = 1 << 0;
        /// Raw X/Y sample pairs.
        const XY = 1 << 1;
        /// Pulse width (reserved payload).
        const PW = 1 << 2;
        /// Versatility (reserved payload).
        const VR = 1 << 3;
        /// Subpixel camera-row values.
        const SP = 1 << 4;
        /// Image rows plus a trailing subpixel fragment.
        const IM = 1 << 5;
    }
}

impl DataType {
    /// Wire size of one value of this type, in bytes.
    pub fn size_bytes(self) -> usize {
        if self == DataType::XY {
            4
        } else if self == DataType::PW || self == DataType::VR || self == DataType::SP {
            2
        } else if self == DataType::LM || self == DataType::IM {
            1
        } else {
            0
        }
    }

    /// Set flags in canonical payload order (LM, XY, PW, VR, SP, IM).
    pub fn ordered(self) -> impl Iterator<Item = DataType> {
        [
            DataType::LM,
            DataType::XY,
            DataType::PW,
            DataType::VR,
            DataType::SP,
            DataType::IM,
        ]
        .into_iter()
        .filter(move |t| self.contains(*t))
    }
}

/// Named combinations of data types with per-type column stride.
///
/// "Full" resolution reports every column, "half" every second, "quarter"
/// every fourth. The step list always follows canonical flag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    XyFullLmFull,
    XyFull,
    LmFull,
    XyHalfLmHalf,
    XyHalf,
    LmHalf,
    XyQuarterLmQuarter,
    XyQuarter,
    LmQuarter,
    XyQuarterLmHalf,
    SubpixelFullLmFull,
    Image,
}

impl DataFormat {
    /// The data-type bitfield this format requests.
    pub fn data_types(self) -> DataType {
        match self {
            DataFormat::XyFullLmFull
            | DataFormat::XyHalfLmHalf
            | DataFormat::XyQuarterLmQuarter
            | DataFormat::XyQuarterLmHalf => DataType::XY | DataType::LM,
            DataFormat::XyFull | DataFormat::XyHalf | DataFormat::XyQuarter => DataType::XY,
            DataFormat::LmFull | DataFormat::LmHalf | DataFormat::LmQuarter => DataType::LM,
            DataFormat::SubpixelFullLmFull => DataType::SP | DataType::LM,
            DataFormat::Image => DataType::IM,
        }
    }

    /// Per-type step list in canonical flag order, parallel to
    /// `data_types().ordered()`.
    pub fn steps(self) -> Vec<u16> {
        match self {
            DataFormat::XyFullLmFull => vec![1, 1],
            DataFormat::XyFull => vec![1],
            DataFormat::LmFull => vec![1],
            DataFormat::XyHalfLmHalf => vec![2, 2],
            DataFormat::XyHalf => vec![2],
            DataFormat::LmHalf => vec![2],
            DataFormat::XyQuarterLmQuarter => vec![4, 4],
            DataFormat::XyQuarter => vec![4],
            DataFormat::LmQuarter => vec![4],
            // LM at half resolution, XY at quarter.
            DataFormat::XyQuarterLmHalf => vec![2, 4],
            DataFormat::SubpixelFullLmFull => vec![1, 1],
            DataFormat::Image => vec![1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_lowest_bit_first() {
        let set = DataType::IM | DataType::LM | DataType::SP;
        let order: Vec<DataType> = set.ordered().collect();
        assert_eq!(order, vec![DataType::LM, DataType::SP, DataType::IM]);
    }

    #[test]
    fn type_sizes() {
        assert_eq!(DataType::LM.size_bytes(), 1);
        assert_eq!(DataType::XY.size_bytes(), 4);
        assert_eq!(DataType::PW.size_bytes(), 2);
        assert_eq!(DataType::VR.size_bytes(), 2);
        assert_eq!(DataType::SP.size_bytes(), 2);
        assert_eq!(DataType::IM.size_bytes(), 1);
    }

    #[test]
    fn preset_table_matches_step_lists() {
        assert_eq!(
            DataFormat::XyFullLmFull.data_types(),
            DataType::XY | DataType::LM
        );
        assert_eq!(DataFormat::XyFullLmFull.steps(), vec![1, 1]);
        assert_eq!(DataFormat::XyQuarterLmHalf.steps(), vec![2, 4]);
        assert_eq!(DataFormat::Image.data_types(), DataType::IM);
        assert_eq!(DataFormat::Image.steps(), vec![1]);
        assert_eq!(
            DataFormat::SubpixelFullLmFull.data_types(),
            DataType::SP | DataType::LM
        );
    }

    #[test]
    fn step_list_length_matches_flag_count() {
        for fmt in [
            DataFormat::XyFullLmFull,
            DataFormat::XyFull,
            DataFormat::LmFull,
            DataFormat::XyHalfLmHalf,
            DataFormat::XyQuarterLmHalf,
            DataFormat::SubpixelFullLmFull,
            DataFormat::Image,
        ] {
            assert_eq!(
                fmt.steps().len(),
                fmt.data_types().ordered().count(),
                "{fmt:?}"
            );
        }
    }
}
