pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use log::{info, warn};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::{HashMap, HashSet},
    fmt::Debug,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use tch::{
    nn::{self, Module as _, ModuleT as _},
    Device, IndexOp as _, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
