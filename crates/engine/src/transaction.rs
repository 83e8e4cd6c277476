/// What a transaction body hands back: its result, plus whether it changed
/// anything.
///
/// `edited` is trusted as-is. A body that writes must report `edited = true`
/// or its changes will never reach an external file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction<T> {
    pub edited: bool,
    pub result: T,
}

impl<T> Transaction<T> {
    pub fn unchanged(result: T) -> Self {
        Self {
            edited: false,
            result,
        }
    }

    pub fn edited(result: T) -> Self {
        Self {
            edited: true,
            result,
        }
    }
}
