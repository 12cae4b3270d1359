use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix the scene host puts on every hand-joint collider name.
pub const JOINT_ENTITY_PREFIX: &str = "HandJoint:";

/// Which hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chirality {
    Left,
    Right,
}

impl Chirality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

/// Skeleton joints reported by the head-mounted hand tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandJoint {
    Wrist,
    ThumbKnuckle,
    ThumbIntermediateBase,
    ThumbIntermediateTip,
    ThumbTip,
    IndexFingerMetacarpal,
    IndexFingerKnuckle,
    IndexFingerIntermediateBase,
    IndexFingerIntermediateTip,
    IndexFingerTip,
    MiddleFingerMetacarpal,
    MiddleFingerKnuckle,
    MiddleFingerIntermediateBase,
    MiddleFingerIntermediateTip,
    MiddleFingerTip,
    RingFingerMetacarpal,
    RingFingerKnuckle,
    RingFingerIntermediateBase,
    RingFingerIntermediateTip,
    RingFingerTip,
    LittleFingerMetacarpal,
    LittleFingerKnuckle,
    LittleFingerIntermediateBase,
    LittleFingerIntermediateTip,
    LittleFingerTip,
    ForearmWrist,
    ForearmArm,
}

impl HandJoint {
    pub const ALL: [HandJoint; 27] = [
        Self::Wrist,
        Self::ThumbKnuckle,
        Self::ThumbIntermediateBase,
        Self::ThumbIntermediateTip,
        Self::ThumbTip,
        Self::IndexFingerMetacarpal,
        Self::IndexFingerKnuckle,
        Self::IndexFingerIntermediateBase,
        Self::IndexFingerIntermediateTip,
        Self::IndexFingerTip,
        Self::MiddleFingerMetacarpal,
        Self::MiddleFingerKnuckle,
        Self::MiddleFingerIntermediateBase,
        Self::MiddleFingerIntermediateTip,
        Self::MiddleFingerTip,
        Self::RingFingerMetacarpal,
        Self::RingFingerKnuckle,
        Self::RingFingerIntermediateBase,
        Self::RingFingerIntermediateTip,
        Self::RingFingerTip,
        Self::LittleFingerMetacarpal,
        Self::LittleFingerKnuckle,
        Self::LittleFingerIntermediateBase,
        Self::LittleFingerIntermediateTip,
        Self::LittleFingerTip,
        Self::ForearmWrist,
        Self::ForearmArm,
    ];

    /// Name used by the tracker and in collider names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrist => "wrist",
            Self::ThumbKnuckle => "thumbKnuckle",
            Self::ThumbIntermediateBase => "thumbIntermediateBase",
            Self::ThumbIntermediateTip => "thumbIntermediateTip",
            Self::ThumbTip => "thumbTip",
            Self::IndexFingerMetacarpal => "indexFingerMetacarpal",
            Self::IndexFingerKnuckle => "indexFingerKnuckle",
            Self::IndexFingerIntermediateBase => "indexFingerIntermediateBase",
            Self::IndexFingerIntermediateTip => "indexFingerIntermediateTip",
            Self::IndexFingerTip => "indexFingerTip",
            Self::MiddleFingerMetacarpal => "middleFingerMetacarpal",
            Self::MiddleFingerKnuckle => "middleFingerKnuckle",
            Self::MiddleFingerIntermediateBase => "middleFingerIntermediateBase",
            Self::MiddleFingerIntermediateTip => "middleFingerIntermediateTip",
            Self::MiddleFingerTip => "middleFingerTip",
            Self::RingFingerMetacarpal => "ringFingerMetacarpal",
            Self::RingFingerKnuckle => "ringFingerKnuckle",
            Self::RingFingerIntermediateBase => "ringFingerIntermediateBase",
            Self::RingFingerIntermediateTip => "ringFingerIntermediateTip",
            Self::RingFingerTip => "ringFingerTip",
            Self::LittleFingerMetacarpal => "littleFingerMetacarpal",
            Self::LittleFingerKnuckle => "littleFingerKnuckle",
            Self::LittleFingerIntermediateBase => "littleFingerIntermediateBase",
            Self::LittleFingerIntermediateTip => "littleFingerIntermediateTip",
            Self::LittleFingerTip => "littleFingerTip",
            Self::ForearmWrist => "forearmWrist",
            Self::ForearmArm => "forearmArm",
        }
    }
}

/// A joint on a specific hand, e.g. `HandJoint:Right_thumbTip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JointName {
    pub chirality: Chirality,
    pub joint: HandJoint,
}

impl JointName {
    pub const fn right(joint: HandJoint) -> Self {
        Self {
            chirality: Chirality::Right,
            joint,
        }
    }

    pub const fn left(joint: HandJoint) -> Self {
        Self {
            chirality: Chirality::Left,
            joint,
        }
    }

    /// Collider/entity name the scene host gives this joint.
    pub fn entity_name(&self) -> String {
        format!(
            "{}{}_{}",
            JOINT_ENTITY_PREFIX,
            self.chirality.as_str(),
            self.joint.as_str()
        )
    }
}

impl fmt::Display for JointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entity_name())
    }
}

/// Error returned when a string is not a joint entity name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseJointError(pub String);

impl fmt::Display for ParseJointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a hand joint name: '{}'", self.0)
    }
}

impl std::error::Error for ParseJointError {}

impl FromStr for JointName {
    type Err = ParseJointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseJointError(s.to_string());

        let rest = s.strip_prefix(JOINT_ENTITY_PREFIX).ok_or_else(err)?;
        let (hand, joint) = rest.split_once('_').ok_or_else(err)?;

        let chirality = match hand {
            "Left" => Chirality::Left,
            "Right" => Chirality::Right,
            _ => return Err(err()),
        };
        let joint = HandJoint::ALL
            .iter()
            .copied()
            .find(|j| j.as_str() == joint)
            .ok_or_else(err)?;

        Ok(Self { chirality, joint })
    }
}

// Joint names travel as their entity-name strings in traces and configs.
impl Serialize for JointName {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.entity_name())
    }
}

impl<'de> Deserialize<'de> for JointName {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
